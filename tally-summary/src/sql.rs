//! Template catalog.
//!
//! Table and column names arrive as identifier parameters resolved from the
//! [`TableRegistry`](crate::tables::TableRegistry), so one template serves every provider.
//! Distributed templates read partitioned tables from the session catalog and write
//! transactional tables through the `postgres` catalog.

use tally_common::template::{Backend, ParamKind as K, ParamSpec as P, Template};

// -----------------------------------------------------------------------------
// Partition lifecycle (distributed)
// -----------------------------------------------------------------------------

pub const DELETE_PARTITION_BY_MONTH: Template = Template {
    name: "delete_partition_by_month",
    backend: Backend::Distributed,
    body: r#"
        DELETE FROM {{schema}}.{{table}}
        WHERE {{source_column}} = {{source}}
          AND year = {{year}}
          AND (month = {{month}} OR month = {{month_unpadded}})
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("table", K::Identifier),
        P::new("source_column", K::Identifier),
        P::new("source", K::Uuid),
        P::new("year", K::Text),
        P::new("month", K::Text),
        P::new("month_unpadded", K::Text),
    ],
};

pub const DELETE_PARTITION_BY_DAY: Template = Template {
    name: "delete_partition_by_day",
    backend: Backend::Distributed,
    body: r#"
        DELETE FROM {{schema}}.{{table}}
        WHERE {{source_a_column}} = {{source_a}}
          AND {{source_b_column}} = {{source_b}}
          AND year = {{year}}
          AND (month = {{month}} OR month = {{month_unpadded}})
          AND day = {{day}}
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("table", K::Identifier),
        P::new("source_a_column", K::Identifier),
        P::new("source_a", K::Uuid),
        P::new("source_b_column", K::Identifier),
        P::new("source_b", K::Uuid),
        P::new("year", K::Text),
        P::new("month", K::Text),
        P::new("month_unpadded", K::Text),
        P::new("day", K::Text),
    ],
};

// -----------------------------------------------------------------------------
// Stage 1: daily summary
// -----------------------------------------------------------------------------

pub const DELETE_DAILY_SUMMARY_RANGE: Template = Template {
    name: "delete_daily_summary_range",
    backend: Backend::Transactional,
    body: r#"
        DELETE FROM {{schema}}.{{table}}
        WHERE source_uuid = {{source_uuid}}
          AND usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("table", K::Identifier),
        P::new("source_uuid", K::Uuid),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

pub const POPULATE_DAILY_SUMMARY: Template = Template {
    name: "populate_daily_summary",
    backend: Backend::Distributed,
    body: r#"
        INSERT INTO postgres.{{schema}}.{{daily_table}} (
            uuid,
            cost_entry_bill_id,
            source_uuid,
            usage_start,
            usage_end,
            {{summary_dimensions}},
            tags,
            {{cost_column}},
            markup_cost
        )
        SELECT uuid(),
            {{bill_id}},
            cast({{source_uuid}} AS uuid),
            date(li.{{raw_date_column}}),
            date(li.{{raw_date_column}}),
            {{raw_dimensions}},
            json_parse(coalesce(nullif(li.{{raw_tags_column}}, ''), '{}')),
            sum(cast(li.{{raw_cost_column}} AS decimal(24, 9))),
            sum(cast(li.{{raw_cost_column}} AS decimal(24, 9))) * {{markup}}
        FROM {{schema}}.{{line_items_table}} AS li
        WHERE li.source = {{source_uuid}}
          AND li.year = {{year}}
          AND (li.month = {{month}} OR li.month = {{month_unpadded}})
          AND date(li.{{raw_date_column}}) >= {{start_date}}
          AND date(li.{{raw_date_column}}) <= {{end_date}}
        GROUP BY date(li.{{raw_date_column}}), {{raw_dimensions}}, li.{{raw_tags_column}}
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("daily_table", K::Identifier),
        P::new("line_items_table", K::Identifier),
        P::new("summary_dimensions", K::IdentifierList),
        P::new("raw_dimensions", K::IdentifierList),
        P::new("raw_date_column", K::Identifier),
        P::new("raw_cost_column", K::Identifier),
        P::new("raw_tags_column", K::Identifier),
        P::new("cost_column", K::Identifier),
        P::new("source_uuid", K::Uuid),
        P::new("bill_id", K::Int),
        P::new("year", K::Text),
        P::new("month", K::Text),
        P::new("month_unpadded", K::Text),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
        P::new("markup", K::Decimal),
    ],
};

// -----------------------------------------------------------------------------
// Stage 2: tags
// -----------------------------------------------------------------------------

pub const POPULATE_ENABLED_TAG_KEYS: Template = Template {
    name: "populate_enabled_tag_keys",
    backend: Backend::Transactional,
    body: r#"
        INSERT INTO {{schema}}.{{enabled_table}} (key, enabled)
        SELECT DISTINCT labels.key, true
        FROM {{schema}}.{{daily_table}} AS li,
            jsonb_each_text(li.tags) AS labels
        WHERE li.cost_entry_bill_id = ANY({{bill_ids}})
          AND li.usage_start >= {{start_date}}
          AND li.usage_start <= {{end_date}}
        ON CONFLICT (key) DO NOTHING
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("enabled_table", K::Identifier),
        P::new("daily_table", K::Identifier),
        P::new("bill_ids", K::IntList),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

pub const POPULATE_TAGS_SUMMARY: Template = Template {
    name: "populate_tags_summary",
    backend: Backend::Transactional,
    body: r#"
        WITH cte_tag_value AS (
            SELECT labels.key, labels.value, li.cost_entry_bill_id
            FROM {{schema}}.{{daily_table}} AS li,
                jsonb_each_text(li.tags) AS labels
            WHERE li.cost_entry_bill_id = ANY({{bill_ids}})
              AND li.usage_start >= {{start_date}}
              AND li.usage_start <= {{end_date}}
            GROUP BY labels.key, labels.value, li.cost_entry_bill_id
        )
        INSERT INTO {{schema}}.{{tags_table}} (uuid, key, values, cost_entry_bill_id)
        SELECT uuid_generate_v4(),
            key,
            array_agg(DISTINCT value ORDER BY value),
            cost_entry_bill_id
        FROM cte_tag_value
        GROUP BY key, cost_entry_bill_id
        ON CONFLICT (key, cost_entry_bill_id) DO UPDATE SET values = EXCLUDED.values
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("daily_table", K::Identifier),
        P::new("tags_table", K::Identifier),
        P::new("bill_ids", K::IntList),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

// -----------------------------------------------------------------------------
// Stage 3: overlay
// -----------------------------------------------------------------------------

pub const DELETE_OVERLAY_PROJECT_RANGE: Template = Template {
    name: "delete_overlay_project_range",
    backend: Backend::Transactional,
    body: r#"
        DELETE FROM {{schema}}.{{table}}
        WHERE source_uuid = {{source_uuid}}
          AND report_period_id = {{report_period_id}}
          AND usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("table", K::Identifier),
        P::new("source_uuid", K::Uuid),
        P::new("report_period_id", K::Int),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

/// Five parts: resource matches, tag matches, cost attribution, partitioned copy, transactional copy.
pub const POPULATE_OVERLAY_DAILY_SUMMARY: Template = Template {
    name: "populate_overlay_daily_summary",
    backend: Backend::Distributed,
    body: r#"
        INSERT INTO {{schema}}.{{resource_temp}} (
            usage_start, resource_id, {{cost_column}}, tags, ocp_source, year, month
        )
        SELECT date(li.{{raw_date_column}}),
            li.{{raw_resource_column}},
            sum(cast(li.{{raw_cost_column}} AS decimal(24, 9))),
            li.{{raw_tags_column}},
            {{ocp_source}},
            {{year}},
            {{month}}
        FROM {{schema}}.{{line_items_table}} AS li
        JOIN (
            SELECT DISTINCT resource_id
            FROM {{schema}}.{{pod_usage_table}}
            WHERE source = {{ocp_source}}
              AND year = {{year}}
              AND (month = {{month}} OR month = {{month_unpadded}})
              AND day IN ({{days}})
              AND resource_id IS NOT NULL
        ) AS ocp ON strpos(li.{{raw_resource_column}}, ocp.resource_id) > 0
        WHERE li.source = {{cloud_source}}
          AND li.year = {{year}}
          AND (li.month = {{month}} OR li.month = {{month_unpadded}})
          AND date(li.{{raw_date_column}}) >= {{start_date}}
          AND date(li.{{raw_date_column}}) <= {{end_date}}
        GROUP BY date(li.{{raw_date_column}}), li.{{raw_resource_column}}, li.{{raw_tags_column}};

        INSERT INTO {{schema}}.{{tag_temp}} (
            usage_start, resource_id, {{cost_column}}, tags, matched_tag, ocp_source, year, month
        )
        SELECT date(li.{{raw_date_column}}),
            li.{{raw_resource_column}},
            sum(cast(li.{{raw_cost_column}} AS decimal(24, 9))),
            li.{{raw_tags_column}},
            t.tag,
            {{ocp_source}},
            {{year}},
            {{month}}
        FROM {{schema}}.{{line_items_table}} AS li
        CROSS JOIN UNNEST(ARRAY[{{matched_tag_strs}}]) AS t(tag)
        WHERE li.source = {{cloud_source}}
          AND li.year = {{year}}
          AND (li.month = {{month}} OR li.month = {{month_unpadded}})
          AND date(li.{{raw_date_column}}) >= {{start_date}}
          AND date(li.{{raw_date_column}}) <= {{end_date}}
          AND strpos(lower(li.{{raw_tags_column}}), lower(t.tag)) > 0
          AND li.{{raw_resource_column}} NOT IN (
              SELECT resource_id FROM {{schema}}.{{resource_temp}}
              WHERE ocp_source = {{ocp_source}} AND year = {{year}} AND month = {{month}}
          )
        GROUP BY date(li.{{raw_date_column}}), li.{{raw_resource_column}}, li.{{raw_tags_column}}, t.tag;

        INSERT INTO {{schema}}.{{project_temp}} (
            usage_start, cluster_id, namespace, node, resource_id, {{cost_column}}, markup_cost,
            pod_cost, project_markup_cost, pod_labels, ocp_source, year, month
        )
        SELECT m.usage_start,
            ocp.cluster_id,
            ocp.namespace,
            ocp.node,
            m.resource_id,
            m.{{cost_column}},
            m.{{cost_column}} * {{markup}},
            m.{{cost_column}} * ocp.{{pod_column}} / nullif(ocp.{{node_column}}, 0),
            m.{{cost_column}} * ocp.{{pod_column}} / nullif(ocp.{{node_column}}, 0) * {{markup}},
            ocp.pod_labels,
            {{ocp_source}},
            {{year}},
            {{month}}
        FROM (
            SELECT usage_start, resource_id, {{cost_column}}
            FROM {{schema}}.{{resource_temp}}
            WHERE ocp_source = {{ocp_source}} AND year = {{year}} AND month = {{month}}
            UNION ALL
            SELECT usage_start, resource_id, {{cost_column}}
            FROM {{schema}}.{{tag_temp}}
            WHERE ocp_source = {{ocp_source}} AND year = {{year}} AND month = {{month}}
        ) AS m
        JOIN {{schema}}.{{pod_usage_table}} AS ocp
            ON ocp.source = {{ocp_source}}
           AND ocp.year = {{year}}
           AND (ocp.month = {{month}} OR ocp.month = {{month_unpadded}})
           AND ocp.day IN ({{days}})
           AND date(ocp.interval_start) = m.usage_start
           AND strpos(m.resource_id, ocp.resource_id) > 0;

        INSERT INTO {{schema}}.{{project_partitioned}} (
            usage_start, cluster_id, namespace, node, resource_id, {{cost_column}}, markup_cost,
            pod_cost, project_markup_cost, pod_labels, cost_entry_bill_id, report_period_id,
            {{overlay_source_column}}, ocp_source, year, month, day
        )
        SELECT usage_start, cluster_id, namespace, node, resource_id, {{cost_column}}, markup_cost,
            pod_cost, project_markup_cost, pod_labels, {{bill_id}}, {{report_period_id}},
            {{cloud_source}}, ocp_source, year, month, cast(day(usage_start) AS varchar)
        FROM {{schema}}.{{project_temp}}
        WHERE ocp_source = {{ocp_source}} AND year = {{year}} AND month = {{month}};

        INSERT INTO postgres.{{schema}}.{{project_table}} (
            uuid, usage_start, usage_end, cluster_id, namespace, node, resource_id,
            {{cost_column}}, markup_cost, pod_cost, project_markup_cost, tags,
            cost_entry_bill_id, report_period_id, source_uuid
        )
        SELECT uuid(), usage_start, usage_start, cluster_id, namespace, node, resource_id,
            {{cost_column}}, markup_cost, pod_cost, project_markup_cost,
            json_parse(coalesce(pod_labels, '{}')),
            {{bill_id}}, {{report_period_id}}, cast({{cloud_source}} AS uuid)
        FROM {{schema}}.{{project_partitioned}}
        WHERE {{overlay_source_column}} = {{cloud_source}}
          AND ocp_source = {{ocp_source}}
          AND year = {{year}}
          AND (month = {{month}} OR month = {{month_unpadded}})
          AND day IN ({{days}})
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("line_items_table", K::Identifier),
        P::new("pod_usage_table", K::Identifier),
        P::new("resource_temp", K::Identifier),
        P::new("tag_temp", K::Identifier),
        P::new("project_temp", K::Identifier),
        P::new("project_partitioned", K::Identifier),
        P::new("project_table", K::Identifier),
        P::new("raw_date_column", K::Identifier),
        P::new("raw_cost_column", K::Identifier),
        P::new("raw_tags_column", K::Identifier),
        P::new("raw_resource_column", K::Identifier),
        P::new("cost_column", K::Identifier),
        P::new("overlay_source_column", K::Identifier),
        P::new("pod_column", K::Identifier),
        P::new("node_column", K::Identifier),
        P::new("cloud_source", K::Uuid),
        P::new("ocp_source", K::Uuid),
        P::new("year", K::Text),
        P::new("month", K::Text),
        P::new("month_unpadded", K::Text),
        P::new("days", K::TextList),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
        P::new("report_period_id", K::Int),
        P::new("bill_id", K::Int),
        P::new("markup", K::Decimal),
        P::new("matched_tag_strs", K::TextList),
    ],
};

pub const POPULATE_OVERLAY_UI_SUMMARY: Template = Template {
    name: "populate_overlay_ui_summary",
    backend: Backend::Distributed,
    body: r#"
        DELETE FROM postgres.{{schema}}.{{ui_table}}
        WHERE usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
          AND source_uuid = cast({{cloud_source}} AS uuid)
          AND ocp_source_uuid = cast({{ocp_source}} AS uuid);

        INSERT INTO postgres.{{schema}}.{{ui_table}} (
            id, {{dimensions}}, {{cost_column}}, markup_cost, source_uuid, ocp_source_uuid
        )
        SELECT uuid(),
            {{dimensions}},
            sum({{cost_column}}),
            sum(markup_cost),
            cast({{cloud_source}} AS uuid),
            cast({{ocp_source}} AS uuid)
        FROM {{schema}}.{{project_partitioned}}
        WHERE {{overlay_source_column}} = {{cloud_source}}
          AND ocp_source = {{ocp_source}}
          AND year = {{year}}
          AND (month = {{month}} OR month = {{month_unpadded}})
          AND day IN ({{days}})
        GROUP BY {{dimensions}}
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("ui_table", K::Identifier),
        P::new("project_partitioned", K::Identifier),
        P::new("dimensions", K::IdentifierList),
        P::new("cost_column", K::Identifier),
        P::new("overlay_source_column", K::Identifier),
        P::new("cloud_source", K::Uuid),
        P::new("ocp_source", K::Uuid),
        P::new("year", K::Text),
        P::new("month", K::Text),
        P::new("month_unpadded", K::Text),
        P::new("days", K::TextList),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

pub const POPULATE_OVERLAY_TAGS_SUMMARY: Template = Template {
    name: "populate_overlay_tags_summary",
    backend: Backend::Transactional,
    body: r#"
        WITH cte_tag_value AS (
            SELECT labels.key, labels.value, li.cost_entry_bill_id, li.report_period_id, li.namespace
            FROM {{schema}}.{{project_table}} AS li,
                jsonb_each_text(li.tags) AS labels
            WHERE li.cost_entry_bill_id = ANY({{bill_ids}})
              AND li.usage_start >= {{start_date}}
              AND li.usage_start <= {{end_date}}
            GROUP BY labels.key, labels.value, li.cost_entry_bill_id, li.report_period_id, li.namespace
        )
        INSERT INTO {{schema}}.{{tags_table}} (
            uuid, key, values, cost_entry_bill_id, report_period_id, namespace
        )
        SELECT uuid_generate_v4(),
            key,
            array_agg(DISTINCT value ORDER BY value),
            cost_entry_bill_id,
            report_period_id,
            namespace
        FROM cte_tag_value
        GROUP BY key, cost_entry_bill_id, report_period_id, namespace
        ON CONFLICT (key, cost_entry_bill_id, report_period_id, namespace)
            DO UPDATE SET values = EXCLUDED.values
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("project_table", K::Identifier),
        P::new("tags_table", K::Identifier),
        P::new("bill_ids", K::IntList),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

// -----------------------------------------------------------------------------
// Stage 4: UI projections
// -----------------------------------------------------------------------------

pub const POPULATE_UI_SUMMARY: Template = Template {
    name: "populate_ui_summary",
    backend: Backend::Transactional,
    body: r#"
        DELETE FROM {{schema}}.{{ui_table}}
        WHERE usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
          AND source_uuid = {{source_uuid}};

        INSERT INTO {{schema}}.{{ui_table}} (
            id, {{dimensions}}, {{cost_column}}, markup_cost, source_uuid
        )
        SELECT uuid_generate_v4(),
            {{dimensions}},
            sum({{cost_column}}),
            sum(markup_cost),
            {{source_uuid}}
        FROM {{schema}}.{{daily_table}}
        WHERE usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
          AND source_uuid = {{source_uuid}}
        GROUP BY {{dimensions}}
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("ui_table", K::Identifier),
        P::new("daily_table", K::Identifier),
        P::new("dimensions", K::IdentifierList),
        P::new("cost_column", K::Identifier),
        P::new("source_uuid", K::Uuid),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

pub const POPULATE_UI_SUMMARY_FILTERED: Template = Template {
    name: "populate_ui_summary_filtered",
    backend: Backend::Transactional,
    body: r#"
        DELETE FROM {{schema}}.{{ui_table}}
        WHERE usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
          AND source_uuid = {{source_uuid}};

        INSERT INTO {{schema}}.{{ui_table}} (
            id, {{dimensions}}, {{cost_column}}, markup_cost, source_uuid
        )
        SELECT uuid_generate_v4(),
            {{dimensions}},
            sum({{cost_column}}),
            sum(markup_cost),
            {{source_uuid}}
        FROM {{schema}}.{{daily_table}}
        WHERE usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
          AND source_uuid = {{source_uuid}}
          AND {{filter_column}} ILIKE ANY({{filter_patterns}})
        GROUP BY {{dimensions}}
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("ui_table", K::Identifier),
        P::new("daily_table", K::Identifier),
        P::new("dimensions", K::IdentifierList),
        P::new("cost_column", K::Identifier),
        P::new("source_uuid", K::Uuid),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
        P::new("filter_column", K::Identifier),
        P::new("filter_patterns", K::TextList),
    ],
};

// -----------------------------------------------------------------------------
// Stage 5: enabled tag back-propagation
// -----------------------------------------------------------------------------

/// Drop tag keys that are not enabled from already materialized rows.
pub const UPDATE_ENABLED_TAGS: Template = Template {
    name: "update_enabled_tags",
    backend: Backend::Transactional,
    body: r#"
        WITH cte_enabled_keys AS (
            SELECT coalesce(array_agg(key), '{}'::text[]) AS keys
            FROM {{schema}}.{{enabled_table}}
            WHERE enabled = true
        )
        UPDATE {{schema}}.{{table}} AS li
        SET tags = (
            SELECT coalesce(jsonb_object_agg(t.key, t.value), '{}'::jsonb)
            FROM jsonb_each(li.tags) AS t
            WHERE t.key = ANY(ek.keys)
        )
        FROM cte_enabled_keys AS ek
        WHERE li.cost_entry_bill_id = ANY({{bill_ids}})
          AND li.usage_start >= {{start_date}}
          AND li.usage_start <= {{end_date}}
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("table", K::Identifier),
        P::new("enabled_table", K::Identifier),
        P::new("bill_ids", K::IntList),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

// -----------------------------------------------------------------------------
// Stage 6: back-population of the container daily summary
// -----------------------------------------------------------------------------

pub const BACK_POPULATE_CONTAINER_INFRASTRUCTURE: Template = Template {
    name: "back_populate_container_infrastructure",
    backend: Backend::Transactional,
    body: r#"
        DELETE FROM {{schema}}.{{container_daily_table}}
        WHERE report_period_id = {{report_period_id}}
          AND usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
          AND infrastructure_source_type = {{source_type}};

        INSERT INTO {{schema}}.{{container_daily_table}} (
            uuid, report_period_id, cluster_id, namespace, node, usage_start, usage_end,
            infrastructure_raw_cost, infrastructure_markup_cost,
            infrastructure_project_raw_cost, infrastructure_project_markup_cost,
            infrastructure_source_type
        )
        SELECT uuid_generate_v4(),
            report_period_id,
            cluster_id,
            namespace,
            node,
            usage_start,
            usage_start,
            sum({{cost_column}}),
            sum(markup_cost),
            sum(pod_cost),
            sum(project_markup_cost),
            {{source_type}}
        FROM {{schema}}.{{project_table}}
        WHERE report_period_id = {{report_period_id}}
          AND usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
        GROUP BY report_period_id, cluster_id, namespace, node, usage_start
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("container_daily_table", K::Identifier),
        P::new("project_table", K::Identifier),
        P::new("cost_column", K::Identifier),
        P::new("report_period_id", K::Int),
        P::new("source_type", K::Text),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

// -----------------------------------------------------------------------------
// Markup
// -----------------------------------------------------------------------------

pub const MARKUP_BY_BILL: Template = Template {
    name: "markup_by_bill",
    backend: Backend::Transactional,
    body: r#"
        UPDATE {{schema}}.{{table}}
        SET {{markup_column}} = {{base_column}} * {{markup}}
        WHERE cost_entry_bill_id = ANY({{bill_ids}})
          AND usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("table", K::Identifier),
        P::new("base_column", K::Identifier),
        P::new("markup_column", K::Identifier),
        P::new("markup", K::Decimal),
        P::new("bill_ids", K::IntList),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

pub const MARKUP_BY_SOURCE: Template = Template {
    name: "markup_by_source",
    backend: Backend::Transactional,
    body: r#"
        UPDATE {{schema}}.{{table}}
        SET {{markup_column}} = {{base_column}} * {{markup}}
        WHERE source_uuid = {{source_uuid}}
          AND usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("table", K::Identifier),
        P::new("base_column", K::Identifier),
        P::new("markup_column", K::Identifier),
        P::new("markup", K::Decimal),
        P::new("source_uuid", K::Uuid),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

pub const MARKUP_BY_SOURCE_TYPE: Template = Template {
    name: "markup_by_source_type",
    backend: Backend::Transactional,
    body: r#"
        UPDATE {{schema}}.{{table}}
        SET {{markup_column}} = {{base_column}} * {{markup}}
        WHERE source_uuid = {{source_uuid}}
          AND source_type = {{source_type}}
          AND usage_start >= {{start_date}}
          AND usage_start <= {{end_date}}
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("table", K::Identifier),
        P::new("base_column", K::Identifier),
        P::new("markup_column", K::Identifier),
        P::new("markup", K::Decimal),
        P::new("source_uuid", K::Uuid),
        P::new("source_type", K::Text),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

// -----------------------------------------------------------------------------
// Tags: reconciliation reads
// -----------------------------------------------------------------------------

pub const COUNT_MATCHING_ENABLED_KEYS: Template = Template {
    name: "count_matching_enabled_keys",
    backend: Backend::Transactional,
    body: r#"
        SELECT count(*)
        FROM {{schema}}.{{enabled_table}} AS cloud
        INNER JOIN {{schema}}.{{container_enabled_table}} AS ocp ON cloud.key = ocp.key
        WHERE cloud.enabled = true
          AND ocp.enabled = true
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("enabled_table", K::Identifier),
        P::new("container_enabled_table", K::Identifier),
    ],
};

pub const MATCHED_TAGS: Template = Template {
    name: "matched_tags",
    backend: Backend::Transactional,
    body: r#"
        WITH cte_cloud_tags AS (
            SELECT DISTINCT ts.key, unnest(ts.values) AS value
            FROM {{schema}}.{{tags_table}} AS ts
            WHERE ts.cost_entry_bill_id = {{bill_id}}
        )
        SELECT jsonb_build_object(c.key, c.value)
        FROM cte_cloud_tags AS c
        WHERE EXISTS (
            SELECT 1
            FROM {{schema}}.{{container_daily_table}} AS ocp
            CROSS JOIN LATERAL jsonb_each_text(coalesce(ocp.pod_labels, '{}'::jsonb)) AS o(key, value)
            WHERE lower(c.key) = lower(o.key) AND lower(c.value) = lower(o.value)
        )
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("tags_table", K::Identifier),
        P::new("container_daily_table", K::Identifier),
        P::new("bill_id", K::Int),
    ],
};

pub const MATCHED_TAGS_DISTRIBUTED: Template = Template {
    name: "matched_tags_distributed",
    backend: Backend::Distributed,
    body: r#"
        WITH cte_cloud_tags AS (
            SELECT DISTINCT tags.key, tags.value
            FROM {{schema}}.{{line_items_table}} AS li
            CROSS JOIN UNNEST(
                cast(json_parse(coalesce(nullif(li.{{raw_tags_column}}, ''), '{}')) AS map(varchar, varchar))
            ) AS tags(key, value)
            WHERE li.source = {{cloud_source}}
              AND li.year = {{year}}
              AND (li.month = {{month}} OR li.month = {{month_unpadded}})
              AND date(li.{{raw_date_column}}) >= {{start_date}}
              AND date(li.{{raw_date_column}}) <= {{end_date}}
        ),
        cte_ocp_labels AS (
            SELECT DISTINCT labels.key, labels.value
            FROM {{schema}}.{{pod_usage_table}} AS ocp
            CROSS JOIN UNNEST(
                cast(json_parse(coalesce(nullif(ocp.pod_labels, ''), '{}')) AS map(varchar, varchar))
            ) AS labels(key, value)
            WHERE ocp.source IN ({{ocp_sources}})
              AND ocp.year = {{year}}
              AND (ocp.month = {{month}} OR ocp.month = {{month_unpadded}})
              AND ocp.day IN ({{days}})
        )
        SELECT json_format(cast(map(ARRAY[c.key], ARRAY[c.value]) AS json))
        FROM cte_cloud_tags AS c
        WHERE EXISTS (
            SELECT 1
            FROM cte_ocp_labels AS o
            WHERE lower(c.key) = lower(o.key) AND lower(c.value) = lower(o.value)
        )
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("line_items_table", K::Identifier),
        P::new("pod_usage_table", K::Identifier),
        P::new("raw_tags_column", K::Identifier),
        P::new("raw_date_column", K::Identifier),
        P::new("cloud_source", K::Uuid),
        P::new("ocp_sources", K::UuidList),
        P::new("year", K::Text),
        P::new("month", K::Text),
        P::new("month_unpadded", K::Text),
        P::new("days", K::TextList),
        P::new("start_date", K::Date),
        P::new("end_date", K::Date),
    ],
};

// -----------------------------------------------------------------------------
// Bills
// -----------------------------------------------------------------------------

pub const BILLS_FOR_PROVIDER: Template = Template {
    name: "bills_for_provider",
    backend: Backend::Transactional,
    body: r#"
        SELECT json_build_object(
            'id', id,
            'provider_uuid', provider_id,
            'billing_period_start', billing_period_start::date
        )
        FROM {{schema}}.{{bill_table}}
        WHERE provider_id = {{provider_uuid}}
        ORDER BY billing_period_start, id
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("bill_table", K::Identifier),
        P::new("provider_uuid", K::Uuid),
    ],
};

pub const BILLS_FOR_PROVIDER_PERIOD: Template = Template {
    name: "bills_for_provider_period",
    backend: Backend::Transactional,
    body: r#"
        SELECT json_build_object(
            'id', id,
            'provider_uuid', provider_id,
            'billing_period_start', billing_period_start::date
        )
        FROM {{schema}}.{{bill_table}}
        WHERE provider_id = {{provider_uuid}}
          AND billing_period_start::date = {{billing_period_start}}
        ORDER BY id
    "#,
    params: &[
        P::new("schema", K::Identifier),
        P::new("bill_table", K::Identifier),
        P::new("provider_uuid", K::Uuid),
        P::new("billing_period_start", K::Date),
    ],
};

pub const ALL: &[Template] = &[
    DELETE_PARTITION_BY_MONTH,
    DELETE_PARTITION_BY_DAY,
    DELETE_DAILY_SUMMARY_RANGE,
    POPULATE_DAILY_SUMMARY,
    POPULATE_ENABLED_TAG_KEYS,
    POPULATE_TAGS_SUMMARY,
    DELETE_OVERLAY_PROJECT_RANGE,
    POPULATE_OVERLAY_DAILY_SUMMARY,
    POPULATE_OVERLAY_UI_SUMMARY,
    POPULATE_OVERLAY_TAGS_SUMMARY,
    POPULATE_UI_SUMMARY,
    POPULATE_UI_SUMMARY_FILTERED,
    UPDATE_ENABLED_TAGS,
    BACK_POPULATE_CONTAINER_INFRASTRUCTURE,
    MARKUP_BY_BILL,
    MARKUP_BY_SOURCE,
    MARKUP_BY_SOURCE_TYPE,
    COUNT_MATCHING_ENABLED_KEYS,
    MATCHED_TAGS,
    MATCHED_TAGS_DISTRIBUTED,
    BILLS_FOR_PROVIDER,
    BILLS_FOR_PROVIDER_PERIOD,
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet};
    use tally_common::template::split_statements;

    #[test]
    fn templates_use_exactly_their_declared_params() {
        for template in ALL {
            let declared: BTreeSet<&str> = template.params.iter().map(|p| p.name).collect();
            assert_eq!(
                template.placeholders(),
                declared,
                "template {}",
                template.name
            );
            assert_eq!(
                declared.len(),
                template.params.len(),
                "template {} declares a parameter twice",
                template.name
            );
        }
    }

    #[test]
    fn template_names_are_unique() {
        let names: HashSet<&str> = ALL.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), ALL.len());
    }

    #[test]
    fn multi_statement_templates() {
        assert_eq!(split_statements(POPULATE_OVERLAY_DAILY_SUMMARY.body).len(), 5);
        assert_eq!(split_statements(POPULATE_UI_SUMMARY.body).len(), 2);
        assert_eq!(split_statements(POPULATE_OVERLAY_UI_SUMMARY.body).len(), 2);
        assert_eq!(split_statements(BACK_POPULATE_CONTAINER_INFRASTRUCTURE.body).len(), 2);
        assert_eq!(split_statements(MARKUP_BY_BILL.body).len(), 1);
    }

    #[test]
    fn matched_tag_variants_share_their_match_rule() {
        const RULE: &str = "WHERE lower(c.key) = lower(o.key) AND lower(c.value) = lower(o.value)";
        for template in [&MATCHED_TAGS, &MATCHED_TAGS_DISTRIBUTED] {
            let body = template.body.split_whitespace().collect::<Vec<_>>().join(" ");
            assert!(body.contains(RULE), "template {}", template.name);
            assert_eq!(body.matches("lower(").count(), 4, "template {}", template.name);
            assert!(!body.contains("enabled"), "template {}", template.name);
            assert!(body.contains("SELECT DISTINCT"), "template {}", template.name);
        }
    }
}
