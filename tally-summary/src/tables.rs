//! Table registry: every table the pipeline touches, resolved per provider type once.

use tally_common::{ProviderType, SummaryError};

/// Semantic role of a table in the summary pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableRole {
    Bill,
    /// Raw line items on the distributed engine, partitioned by source/year/month.
    LineItems,
    LineItemDailySummary,
    TagsSummary,
    EnabledTagKeys,
    /// Overlay rows materialized on the transactional backend.
    OverlayProjectDailySummary,
    /// Overlay rows on the distributed engine, partitioned by both sources and day.
    OverlayProjectDailySummaryPartitioned,
    OverlayProjectDailySummaryTemp,
    OverlayResourceMatchedTemp,
    OverlayTagMatchedTemp,
    OverlayTagsSummary,
    ContainerEnabledTagKeys,
    ContainerDailySummary,
    ContainerPodUsage,
    AllCloudDailySummary,
    AllCloudProjectDailySummary,
}

/// Optional `column ILIKE ANY(patterns)` restriction of a UI projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceFilter {
    pub column: &'static str,
    pub patterns: &'static [&'static str],
}

/// A UI summary table: grouping dimensions plus an optional service filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiProjection {
    pub table: &'static str,
    pub dimensions: &'static [&'static str],
    pub filter: Option<ServiceFilter>,
}

/// How rows of a markup target are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupScope {
    /// `cost_entry_bill_id` in the bills being updated.
    Bill,
    /// `source_uuid` equals the provider.
    Source,
    /// `source_uuid` equals the provider and `source_type` the given tag.
    SourceType(&'static str),
}

/// `markup_column = base_column * rate` on one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkupTarget {
    pub table: &'static str,
    pub base_column: &'static str,
    pub markup_column: &'static str,
    pub scope: MarkupScope,
}

/// Raw line items to daily summary column mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyLayout {
    /// Raw columns grouped on, positionally matching `summary_dimensions`.
    pub raw_dimensions: &'static [&'static str],
    pub summary_dimensions: &'static [&'static str],
    pub raw_date_column: &'static str,
    pub raw_cost_column: &'static str,
    /// JSON text column of raw tags; lands in the summary `tags` column.
    pub raw_tags_column: &'static str,
    /// Matched against node resource ids for overlays.
    pub raw_resource_column: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Overlay {
    project_daily_summary: &'static str,
    project_daily_summary_partitioned: &'static str,
    project_daily_summary_temp: &'static str,
    resource_matched_temp: &'static str,
    tag_matched_temp: &'static str,
    tags_summary: &'static str,
    /// Column carrying the cloud source in partitioned overlay tables.
    source_column: &'static str,
    ui: &'static [UiProjection],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRegistry {
    provider: ProviderType,
    bill: &'static str,
    line_items: &'static str,
    daily_summary: &'static str,
    tags_summary: &'static str,
    enabled_tag_keys: &'static str,
    cost_column: &'static str,
    layout: DailyLayout,
    ui: &'static [UiProjection],
    overlay: Option<Overlay>,
}

const CONTAINER_ENABLED_TAG_KEYS: &str = "reporting_ocpenabledtagkeys";
const CONTAINER_DAILY_SUMMARY: &str = "reporting_ocpusagelineitem_daily_summary";
const CONTAINER_POD_USAGE: &str = "openshift_pod_usage_line_items_daily";
const ALL_CLOUD_DAILY_SUMMARY: &str = "reporting_ocpallcostlineitem_daily_summary_p";
const ALL_CLOUD_PROJECT_DAILY_SUMMARY: &str = "reporting_ocpallcostlineitem_project_daily_summary_p";

/// All-cloud perspective tables; markup there is always `unblended_cost` based.
const ALL_CLOUD_PERSPECTIVES: &[&str] = &[
    "reporting_ocpall_cost_summary_pt",
    "reporting_ocpall_cost_summary_by_account_pt",
    "reporting_ocpall_cost_summary_by_region_pt",
    "reporting_ocpall_cost_summary_by_service_pt",
    "reporting_ocpall_compute_summary_pt",
    "reporting_ocpall_database_summary_pt",
    "reporting_ocpall_network_summary_pt",
    "reporting_ocpall_storage_summary_pt",
];

const fn ui(table: &'static str, dimensions: &'static [&'static str]) -> UiProjection {
    UiProjection {
        table,
        dimensions,
        filter: None,
    }
}

const fn ui_filtered(
    table: &'static str,
    dimensions: &'static [&'static str],
    column: &'static str,
    patterns: &'static [&'static str],
) -> UiProjection {
    UiProjection {
        table,
        dimensions,
        filter: Some(ServiceFilter { column, patterns }),
    }
}

// --- AWS ---

const AWS_UI: &[UiProjection] = &[
    ui("reporting_aws_cost_summary_p", &["usage_start", "currency_code"]),
    ui("reporting_aws_cost_summary_by_account_p", &["usage_start", "usage_account_id", "account_alias_id", "currency_code"]),
    ui("reporting_aws_cost_summary_by_region_p", &["usage_start", "usage_account_id", "region", "availability_zone", "currency_code"]),
    ui("reporting_aws_cost_summary_by_service_p", &["usage_start", "usage_account_id", "product_code", "product_family", "currency_code"]),
    ui_filtered("reporting_aws_compute_summary_p", &["usage_start", "instance_type", "currency_code"], "product_code", &["%AmazonEC2%"]),
    ui_filtered("reporting_aws_database_summary_p", &["usage_start", "product_code", "currency_code"], "product_code", &["%AmazonRDS%", "%AmazonDynamoDB%", "%AmazonElastiCache%", "%AmazonRedshift%"]),
    ui_filtered("reporting_aws_network_summary_p", &["usage_start", "product_code", "currency_code"], "product_code", &["%AmazonVPC%", "%AmazonCloudFront%", "%AmazonRoute53%", "%AmazonAPIGateway%"]),
    ui_filtered("reporting_aws_storage_summary_p", &["usage_start", "product_family", "currency_code"], "product_family", &["%Storage%"]),
];

const AWS_OVERLAY_UI: &[UiProjection] = &[
    ui("reporting_ocpaws_cost_summary_p", &["usage_start", "cluster_id", "currency_code"]),
    ui("reporting_ocpaws_cost_summary_by_account_p", &["usage_start", "cluster_id", "usage_account_id", "currency_code"]),
    ui("reporting_ocpaws_cost_summary_by_service_p", &["usage_start", "cluster_id", "usage_account_id", "product_code", "currency_code"]),
];

static AWS: TableRegistry = TableRegistry {
    provider: ProviderType::Aws,
    bill: "reporting_awscostentrybill",
    line_items: "aws_line_items_daily",
    daily_summary: "reporting_awscostentrylineitem_daily_summary",
    tags_summary: "reporting_awstags_summary",
    enabled_tag_keys: "reporting_awsenabledtagkeys",
    cost_column: "unblended_cost",
    layout: DailyLayout {
        raw_dimensions: &["lineitem_usageaccountid", "product_productcode", "product_productfamily", "product_instancetype", "product_region", "lineitem_availabilityzone", "lineitem_currencycode"],
        summary_dimensions: &["usage_account_id", "product_code", "product_family", "instance_type", "region", "availability_zone", "currency_code"],
        raw_date_column: "lineitem_usagestartdate",
        raw_cost_column: "lineitem_unblendedcost",
        raw_tags_column: "resourcetags",
        raw_resource_column: "lineitem_resourceid",
    },
    ui: AWS_UI,
    overlay: Some(Overlay {
        project_daily_summary: "reporting_ocpawscostlineitem_project_daily_summary_p",
        project_daily_summary_partitioned: "reporting_ocpawscostlineitem_project_daily_summary",
        project_daily_summary_temp: "reporting_ocpawscostlineitem_project_daily_summary_temp",
        resource_matched_temp: "aws_openshift_daily_resource_matched_temp",
        tag_matched_temp: "aws_openshift_daily_tag_matched_temp",
        tags_summary: "reporting_ocpawstags_summary",
        source_column: "aws_source",
        ui: AWS_OVERLAY_UI,
    }),
};

// --- Azure ---

const AZURE_UI: &[UiProjection] = &[
    ui("reporting_azure_cost_summary_p", &["usage_start", "currency"]),
    ui("reporting_azure_cost_summary_by_account_p", &["usage_start", "subscription_guid", "currency"]),
    ui("reporting_azure_cost_summary_by_location_p", &["usage_start", "subscription_guid", "resource_location", "currency"]),
    ui("reporting_azure_cost_summary_by_service_p", &["usage_start", "subscription_guid", "service_name", "currency"]),
    ui_filtered("reporting_azure_compute_summary_p", &["usage_start", "subscription_guid", "instance_type", "currency"], "service_name", &["Virtual Machines"]),
    ui_filtered("reporting_azure_database_summary_p", &["usage_start", "subscription_guid", "service_name", "currency"], "service_name", &["%Database%", "%Cosmos%", "%Cache for Redis%"]),
    ui_filtered("reporting_azure_network_summary_p", &["usage_start", "subscription_guid", "service_name", "currency"], "service_name", &["%Virtual Network%", "%VPN%", "%DNS%", "%Traffic Manager%", "%ExpressRoute%", "%Load Balancer%", "%Application Gateway%"]),
    ui_filtered("reporting_azure_storage_summary_p", &["usage_start", "subscription_guid", "service_name", "currency"], "service_name", &["%Storage%"]),
];

const AZURE_OVERLAY_UI: &[UiProjection] = &[
    ui("reporting_ocpazure_cost_summary_p", &["usage_start", "cluster_id", "currency"]),
    ui("reporting_ocpazure_cost_summary_by_account_p", &["usage_start", "cluster_id", "subscription_guid", "currency"]),
    ui("reporting_ocpazure_cost_summary_by_location_p", &["usage_start", "cluster_id", "subscription_guid", "resource_location", "currency"]),
    ui("reporting_ocpazure_cost_summary_by_service_p", &["usage_start", "cluster_id", "subscription_guid", "service_name", "currency"]),
];

static AZURE: TableRegistry = TableRegistry {
    provider: ProviderType::Azure,
    bill: "reporting_azurecostentrybill",
    line_items: "azure_line_items",
    daily_summary: "reporting_azurecostentrylineitem_daily_summary",
    tags_summary: "reporting_azuretags_summary",
    enabled_tag_keys: "reporting_azureenabledtagkeys",
    cost_column: "pretax_cost",
    layout: DailyLayout {
        raw_dimensions: &["subscriptionid", "resourcelocation", "servicename", "metercategory", "instance_type", "billingcurrency"],
        summary_dimensions: &["subscription_guid", "resource_location", "service_name", "service_tier", "instance_type", "currency"],
        raw_date_column: "date",
        raw_cost_column: "costinbillingcurrency",
        raw_tags_column: "tags",
        raw_resource_column: "resourceid",
    },
    ui: AZURE_UI,
    overlay: Some(Overlay {
        project_daily_summary: "reporting_ocpazurecostlineitem_project_daily_summary_p",
        project_daily_summary_partitioned: "reporting_ocpazurecostlineitem_project_daily_summary",
        project_daily_summary_temp: "reporting_ocpazurecostlineitem_project_daily_summary_temp",
        resource_matched_temp: "azure_openshift_daily_resource_matched_temp",
        tag_matched_temp: "azure_openshift_daily_tag_matched_temp",
        tags_summary: "reporting_ocpazuretags_summary",
        source_column: "azure_source",
        ui: AZURE_OVERLAY_UI,
    }),
};

// --- GCP ---

const GCP_UI: &[UiProjection] = &[
    ui("reporting_gcp_cost_summary_p", &["usage_start", "currency"]),
    ui("reporting_gcp_cost_summary_by_account_p", &["usage_start", "account_id", "currency"]),
    ui("reporting_gcp_cost_summary_by_project_p", &["usage_start", "account_id", "project_id", "project_name", "currency"]),
    ui("reporting_gcp_cost_summary_by_region_p", &["usage_start", "account_id", "region", "currency"]),
    ui("reporting_gcp_cost_summary_by_service_p", &["usage_start", "account_id", "service_id", "service_alias", "currency"]),
    ui_filtered("reporting_gcp_compute_summary_p", &["usage_start", "account_id", "instance_type", "currency"], "service_alias", &["Compute Engine"]),
    ui_filtered("reporting_gcp_database_summary_p", &["usage_start", "account_id", "service_id", "service_alias", "currency"], "service_alias", &["%SQL%", "%Spanner%", "%Bigtable%", "%Firestore%", "%Firebase%", "%Memorystore%", "%MongoDB%"]),
    ui_filtered("reporting_gcp_network_summary_p", &["usage_start", "account_id", "service_id", "service_alias", "currency"], "service_alias", &["%Network%", "%VPC%", "%Firewall%", "%Route%", "%IP%", "%DNS%", "%CDN%", "%NAT%", "%Traffic Director%", "%Service Discovery%", "%Cloud Domains%", "%Private Service Connect%", "%Cloud Armor%"]),
    ui_filtered("reporting_gcp_storage_summary_p", &["usage_start", "account_id", "service_id", "service_alias", "currency"], "service_alias", &["%Storage%", "%Filestore%", "%Data Transfer%"]),
];

const GCP_OVERLAY_UI: &[UiProjection] = &[
    ui("reporting_ocpgcp_cost_summary_p", &["usage_start", "cluster_id", "currency"]),
    ui("reporting_ocpgcp_cost_summary_by_account_p", &["usage_start", "cluster_id", "account_id", "currency"]),
    ui("reporting_ocpgcp_cost_summary_by_service_p", &["usage_start", "cluster_id", "account_id", "service_id", "service_alias", "currency"]),
];

static GCP: TableRegistry = TableRegistry {
    provider: ProviderType::Gcp,
    bill: "reporting_gcpcostentrybill",
    line_items: "gcp_line_items_daily",
    daily_summary: "reporting_gcpcostentrylineitem_daily_summary",
    tags_summary: "reporting_gcptags_summary",
    enabled_tag_keys: "reporting_gcpenabledtagkeys",
    cost_column: "unblended_cost",
    layout: DailyLayout {
        raw_dimensions: &["billing_account_id", "project_id", "project_name", "service_id", "service_description", "sku_id", "location_region", "currency"],
        summary_dimensions: &["account_id", "project_id", "project_name", "service_id", "service_alias", "sku_id", "region", "currency"],
        raw_date_column: "usage_start_time",
        raw_cost_column: "cost",
        raw_tags_column: "labels",
        raw_resource_column: "resource_name",
    },
    ui: GCP_UI,
    overlay: Some(Overlay {
        project_daily_summary: "reporting_ocpgcpcostlineitem_project_daily_summary_p",
        project_daily_summary_partitioned: "reporting_ocpgcpcostlineitem_project_daily_summary",
        project_daily_summary_temp: "reporting_ocpgcpcostlineitem_project_daily_summary_temp",
        resource_matched_temp: "gcp_openshift_daily_resource_matched_temp",
        tag_matched_temp: "gcp_openshift_daily_tag_matched_temp",
        tags_summary: "reporting_ocpgcptags_summary",
        source_column: "gcp_source",
        ui: GCP_OVERLAY_UI,
    }),
};

// --- OCI ---

const OCI_UI: &[UiProjection] = &[
    ui("reporting_oci_cost_summary_p", &["usage_start", "currency"]),
    ui("reporting_oci_cost_summary_by_account_p", &["usage_start", "payer_tenant_id", "currency"]),
    ui("reporting_oci_cost_summary_by_region_p", &["usage_start", "payer_tenant_id", "region", "currency"]),
    ui("reporting_oci_cost_summary_by_service_p", &["usage_start", "payer_tenant_id", "product_service", "currency"]),
    ui_filtered("reporting_oci_compute_summary_p", &["usage_start", "payer_tenant_id", "instance_type", "currency"], "product_service", &["%COMPUTE%"]),
    ui_filtered("reporting_oci_database_summary_p", &["usage_start", "payer_tenant_id", "product_service", "currency"], "product_service", &["%DATABASE%"]),
    ui_filtered("reporting_oci_network_summary_p", &["usage_start", "payer_tenant_id", "product_service", "currency"], "product_service", &["%NETWORK%", "%VCN%", "%DNS%"]),
    ui_filtered("reporting_oci_storage_summary_p", &["usage_start", "payer_tenant_id", "product_service", "currency"], "product_service", &["%STORAGE%", "%BLOCK%", "%OBJECT%"]),
];

static OCI: TableRegistry = TableRegistry {
    provider: ProviderType::Oci,
    bill: "reporting_ocicostentrybill",
    line_items: "oci_cost_line_items_daily",
    daily_summary: "reporting_ocicostentrylineitem_daily_summary",
    tags_summary: "reporting_ocitags_summary",
    enabled_tag_keys: "reporting_ocienabledtagkeys",
    cost_column: "cost",
    layout: DailyLayout {
        raw_dimensions: &["lineitem_tenantid", "product_service", "product_region", "product_resource", "cost_currencycode"],
        summary_dimensions: &["payer_tenant_id", "product_service", "region", "instance_type", "currency"],
        raw_date_column: "lineitem_intervalusagestart",
        raw_cost_column: "cost_mycost",
        raw_tags_column: "tags",
        raw_resource_column: "product_resourceid",
    },
    ui: OCI_UI,
    overlay: None,
};

impl TableRegistry {
    /// Resolve the registry for a cloud provider. Local sources share the real provider's tables.
    pub fn for_provider(provider: ProviderType) -> Result<&'static TableRegistry, SummaryError> {
        match provider.base() {
            ProviderType::Aws => Ok(&AWS),
            ProviderType::Azure => Ok(&AZURE),
            ProviderType::Gcp => Ok(&GCP),
            ProviderType::Oci => Ok(&OCI),
            other => Err(SummaryError::Configuration(format!(
                "no summary tables for provider type {}",
                other
            ))),
        }
    }

    pub fn provider(&self) -> ProviderType {
        self.provider
    }

    /// Resolve a role. Roles a provider lacks (OCI overlays) are a configuration error.
    pub fn table(&self, role: TableRole) -> Result<&'static str, SummaryError> {
        let overlay = |pick: fn(&Overlay) -> &'static str| {
            self.overlay.as_ref().map(pick).ok_or_else(|| {
                SummaryError::Configuration(format!(
                    "provider type {} has no {:?} table",
                    self.provider, role
                ))
            })
        };
        match role {
            TableRole::Bill => Ok(self.bill),
            TableRole::LineItems => Ok(self.line_items),
            TableRole::LineItemDailySummary => Ok(self.daily_summary),
            TableRole::TagsSummary => Ok(self.tags_summary),
            TableRole::EnabledTagKeys => Ok(self.enabled_tag_keys),
            TableRole::OverlayProjectDailySummary => overlay(|o| o.project_daily_summary),
            TableRole::OverlayProjectDailySummaryPartitioned => {
                overlay(|o| o.project_daily_summary_partitioned)
            }
            TableRole::OverlayProjectDailySummaryTemp => overlay(|o| o.project_daily_summary_temp),
            TableRole::OverlayResourceMatchedTemp => overlay(|o| o.resource_matched_temp),
            TableRole::OverlayTagMatchedTemp => overlay(|o| o.tag_matched_temp),
            TableRole::OverlayTagsSummary => overlay(|o| o.tags_summary),
            TableRole::ContainerEnabledTagKeys => Ok(CONTAINER_ENABLED_TAG_KEYS),
            TableRole::ContainerDailySummary => Ok(CONTAINER_DAILY_SUMMARY),
            TableRole::ContainerPodUsage => Ok(CONTAINER_POD_USAGE),
            TableRole::AllCloudDailySummary => overlay(|_| ALL_CLOUD_DAILY_SUMMARY),
            TableRole::AllCloudProjectDailySummary => overlay(|_| ALL_CLOUD_PROJECT_DAILY_SUMMARY),
        }
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// Cloud source column of the partitioned overlay tables (`azure_source`, ...).
    pub fn overlay_source_column(&self) -> Option<&'static str> {
        self.overlay.as_ref().map(|o| o.source_column)
    }

    /// Temp tables cleared per month before an overlay run.
    pub fn overlay_temp_tables(&self) -> Vec<&'static str> {
        self.overlay
            .as_ref()
            .map(|o| {
                vec![
                    o.project_daily_summary_temp,
                    o.resource_matched_temp,
                    o.tag_matched_temp,
                ]
            })
            .unwrap_or_default()
    }

    /// Base cost column of the daily summary (`unblended_cost`, `pretax_cost`, `cost`).
    pub fn cost_column(&self) -> &'static str {
        self.cost_column
    }

    pub fn daily_layout(&self) -> &DailyLayout {
        &self.layout
    }

    pub fn ui_projections(&self) -> &'static [UiProjection] {
        self.ui
    }

    pub fn overlay_ui_projections(&self) -> &'static [UiProjection] {
        self.overlay.as_ref().map(|o| o.ui).unwrap_or(&[])
    }

    /// Tag used in `source_type` columns of all-cloud tables.
    pub fn source_type(&self) -> &'static str {
        self.provider.as_str()
    }

    /// Every table whose markup derives from this provider's cost.
    pub fn markup_targets(&self) -> Vec<MarkupTarget> {
        let mut targets = vec![MarkupTarget {
            table: self.daily_summary,
            base_column: self.cost_column,
            markup_column: "markup_cost",
            scope: MarkupScope::Bill,
        }];
        let Some(overlay) = &self.overlay else {
            return targets;
        };

        targets.push(MarkupTarget {
            table: overlay.project_daily_summary,
            base_column: self.cost_column,
            markup_column: "markup_cost",
            scope: MarkupScope::Bill,
        });
        targets.push(MarkupTarget {
            table: overlay.project_daily_summary,
            base_column: "pod_cost",
            markup_column: "project_markup_cost",
            scope: MarkupScope::Bill,
        });
        targets.extend(overlay.ui.iter().map(|ui| MarkupTarget {
            table: ui.table,
            base_column: self.cost_column,
            markup_column: "markup_cost",
            scope: MarkupScope::Source,
        }));

        let typed = MarkupScope::SourceType(self.source_type());
        targets.push(MarkupTarget {
            table: ALL_CLOUD_PROJECT_DAILY_SUMMARY,
            base_column: "pod_cost",
            markup_column: "project_markup_cost",
            scope: typed,
        });
        targets.extend(
            std::iter::once(ALL_CLOUD_DAILY_SUMMARY)
                .chain(ALL_CLOUD_PERSPECTIVES.iter().copied())
                .map(|table| MarkupTarget {
                    table,
                    base_column: "unblended_cost",
                    markup_column: "markup_cost",
                    scope: typed,
                }),
        );
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_providers_share_tables() {
        let azure = TableRegistry::for_provider(ProviderType::AzureLocal).unwrap();
        assert_eq!(azure.provider(), ProviderType::Azure);
        assert_eq!(
            azure.table(TableRole::LineItemDailySummary).unwrap(),
            "reporting_azurecostentrylineitem_daily_summary"
        );
        assert_eq!(azure.cost_column(), "pretax_cost");
        assert_eq!(azure.overlay_source_column(), Some("azure_source"));
    }

    #[test]
    fn container_platform_has_no_cloud_registry() {
        assert!(matches!(
            TableRegistry::for_provider(ProviderType::Ocp),
            Err(SummaryError::Configuration(_))
        ));
    }

    #[test]
    fn oci_has_no_overlay() {
        let oci = TableRegistry::for_provider(ProviderType::Oci).unwrap();
        assert!(!oci.has_overlay());
        assert!(oci.overlay_temp_tables().is_empty());
        assert!(oci.table(TableRole::OverlayTagsSummary).is_err());
        assert!(oci.table(TableRole::ContainerEnabledTagKeys).is_ok());
        assert_eq!(oci.markup_targets().len(), 1);
    }

    #[test]
    fn layouts_line_up() {
        for provider in [ProviderType::Aws, ProviderType::Azure, ProviderType::Gcp, ProviderType::Oci] {
            let registry = TableRegistry::for_provider(provider).unwrap();
            let layout = registry.daily_layout();
            assert_eq!(
                layout.raw_dimensions.len(),
                layout.summary_dimensions.len(),
                "{provider}"
            );
            assert!(registry.ui_projections().iter().all(|ui| ui.dimensions.contains(&"usage_start")));
        }
    }

    #[test]
    fn markup_targets_cover_overlay_and_all_cloud() {
        let azure = TableRegistry::for_provider(ProviderType::Azure).unwrap();
        let targets = azure.markup_targets();

        let project: Vec<_> = targets
            .iter()
            .filter(|t| t.table == "reporting_ocpazurecostlineitem_project_daily_summary_p")
            .collect();
        assert_eq!(project.len(), 2);
        assert!(project
            .iter()
            .any(|t| t.base_column == "pod_cost" && t.markup_column == "project_markup_cost"));

        assert!(targets.iter().any(|t| t.table == "reporting_ocpall_cost_summary_pt"
            && t.scope == MarkupScope::SourceType("Azure")));
        assert!(targets
            .iter()
            .filter(|t| t.scope == MarkupScope::Source)
            .all(|t| t.base_column == "pretax_cost"));
    }
}
