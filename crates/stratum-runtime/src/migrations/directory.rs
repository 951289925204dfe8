//! Directory schema and contents for mail recipients.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use stratum_core::directory::{DirectoryEntry, Filter, Modification, SearchScope};
use stratum_core::error::Result;
use stratum_core::migration::{
    DirectoryContext, MigrationContext, MigrationUnit, Outcome, RecordWarning, UnitInfo,
};

use crate::registry::MigrationRegistry;

pub const NAMESPACE: &str = "directory";

const RECIPIENT_CLASS: &str = "Mail-Recipient";
const INTERNAL_MARKER: &str = "showInAdvancedViewOnly";

/// Register every unit of the `directory` namespace.
pub fn register(registry: &mut MigrationRegistry) -> Result<()> {
    registry.register(Arc::new(AddRecipientAttributes))
}

struct AttributeSchema {
    cn: &'static str,
    ldap_name: &'static str,
    attribute_id: &'static str,
    attribute_syntax: &'static str,
    om_syntax: &'static str,
    mapi_id: Option<&'static str>,
    /// Value given to user entries that lack the attribute.
    user_default: &'static str,
}

const RECIPIENT_ATTRIBUTES: [AttributeSchema; 2] = [
    AttributeSchema {
        cn: "ms-Exch-Recipient-Display-Type",
        ldap_name: "msExchRecipientDisplayType",
        attribute_id: "1.2.840.113556.1.4.7000.102.50730",
        attribute_syntax: "2.5.5.9",
        om_syntax: "2",
        mapi_id: Some("14597"),
        user_default: "0",
    },
    AttributeSchema {
        cn: "ms-Exch-Recipient-Type-Details",
        ldap_name: "msExchRecipientTypeDetails",
        attribute_id: "1.2.840.113556.1.4.7000.102.50855",
        attribute_syntax: "2.5.5.16",
        om_syntax: "65",
        mapi_id: None,
        user_default: "6",
    },
];

impl AttributeSchema {
    fn dn(&self, schema_dn: &str) -> String {
        format!("CN={},{}", self.cn, schema_dn)
    }

    fn entry(&self, schema_dn: &str) -> DirectoryEntry {
        let mut entry = DirectoryEntry::new(self.dn(schema_dn))
            .with_attr("objectClass", "top")
            .with_attr("objectClass", "attributeSchema")
            .with_attr("cn", self.cn)
            .with_attr("name", self.cn)
            .with_attr("instanceType", "4")
            .with_attr("attributeID", self.attribute_id)
            .with_attr("attributeSyntax", self.attribute_syntax)
            .with_attr("oMSyntax", self.om_syntax)
            .with_attr("isSingleValued", "TRUE")
            .with_attr("searchFlags", "1")
            .with_attr("lDAPDisplayName", self.ldap_name)
            .with_attr("adminDisplayName", self.cn)
            .with_attr("adminDescription", self.cn)
            .with_attr("showInAdvancedViewOnly", "TRUE")
            .with_attr("isMemberOfPartialAttributeSet", "TRUE")
            .with_attr("objectCategory", format!("CN=Attribute-Schema,{}", schema_dn));
        if let Some(mapi_id) = self.mapi_id {
            entry.add_value("mAPIID", mapi_id);
        }
        entry
    }
}

/// v1: add the recipient display-type and type-details attributes to the
/// schema and backfill them on user entries.
///
/// Schema entries cannot be removed once replicated, so this unit is
/// irreversible.
pub struct AddRecipientAttributes;

impl AddRecipientAttributes {
    async fn run(ctx: &MigrationContext) -> Result<Outcome> {
        let dir = ctx.directory_backend()?;
        let mut warnings = Vec::new();

        Self::add_schema_attributes(dir, &mut warnings).await;
        Self::refresh_schema(dir, &mut warnings).await;
        Self::extend_recipient_class(dir, &mut warnings).await;
        Self::refresh_schema(dir, &mut warnings).await;
        Self::backfill_users(dir, &mut warnings).await?;

        Ok(Outcome::with_warnings(warnings))
    }

    async fn add_schema_attributes(dir: &DirectoryContext, warnings: &mut Vec<RecordWarning>) {
        let schema_dn = dir.naming.schema_dn();

        for attribute in &RECIPIENT_ATTRIBUTES {
            let dn = attribute.dn(&schema_dn);
            let result = match dir.client().read(&dn).await {
                Ok(Some(_)) => {
                    debug!(attribute = attribute.ldap_name, "Schema attribute already present");
                    continue;
                }
                Ok(None) => dir.client().add(attribute.entry(&schema_dn)).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => info!(attribute = attribute.ldap_name, "Added schema attribute"),
                Err(e) => {
                    warn!(attribute = attribute.ldap_name, error = %e, "Failed to add schema attribute");
                    warnings.push(RecordWarning::new(dn, e.to_string()));
                }
            }
        }
    }

    async fn extend_recipient_class(dir: &DirectoryContext, warnings: &mut Vec<RecordWarning>) {
        let class_dn = format!("CN={},{}", RECIPIENT_CLASS, dir.naming.schema_dn());

        let class = match dir.client().read(&class_dn).await {
            Ok(Some(class)) => class,
            Ok(None) => {
                warnings.push(RecordWarning::new(class_dn, "class schema entry not found"));
                return;
            }
            Err(e) => {
                warnings.push(RecordWarning::new(class_dn, e.to_string()));
                return;
            }
        };

        let missing: Vec<String> = RECIPIENT_ATTRIBUTES
            .iter()
            .filter(|a| !class.has_value("mayContain", a.ldap_name))
            .map(|a| a.ldap_name.to_string())
            .collect();
        if missing.is_empty() {
            debug!("{} already allows recipient attributes", RECIPIENT_CLASS);
            return;
        }

        let modification = Modification::Add {
            attr: "mayContain".to_string(),
            values: missing,
        };
        match dir.client().modify(&class_dn, vec![modification]).await {
            Ok(()) => info!("Extended {} with recipient attributes", RECIPIENT_CLASS),
            Err(e) => {
                warn!(error = %e, "Failed to extend {}", RECIPIENT_CLASS);
                warnings.push(RecordWarning::new(class_dn, e.to_string()));
            }
        }
    }

    async fn refresh_schema(dir: &DirectoryContext, warnings: &mut Vec<RecordWarning>) {
        if let Err(e) = dir.client().refresh_schema().await {
            warn!(error = %e, "Schema refresh failed");
            warnings.push(RecordWarning::new("schema refresh", e.to_string()));
        }
    }

    /// A failed search fails the unit; failures on single users do not.
    async fn backfill_users(dir: &DirectoryContext, warnings: &mut Vec<RecordWarning>) -> Result<()> {
        let users = dir
            .client()
            .search(
                &dir.naming.users_dn(),
                SearchScope::Subtree,
                &Filter::eq("objectClass", "user"),
            )
            .await?;

        let mut updated = 0usize;
        for user in users {
            if user.has_attr(INTERNAL_MARKER) {
                continue;
            }

            let modifications: Vec<Modification> = RECIPIENT_ATTRIBUTES
                .iter()
                .filter(|a| !user.has_attr(a.ldap_name))
                .map(|a| Modification::add(a.ldap_name, a.user_default))
                .collect();
            if modifications.is_empty() {
                continue;
            }

            match dir.client().modify(&user.dn, modifications).await {
                Ok(()) => updated += 1,
                Err(e) => {
                    warn!(user = %user.dn, error = %e, "Skipping user");
                    warnings.push(RecordWarning::new(user.dn.clone(), e.to_string()));
                }
            }
        }

        info!(updated, "Backfilled recipient attributes on users");
        Ok(())
    }
}

impl MigrationUnit for AddRecipientAttributes {
    fn info(&self) -> UnitInfo {
        UnitInfo::new(NAMESPACE, 1, "Add missing recipient attributes").irreversible()
    }

    fn apply<'a>(&'a self, ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome> {
        Box::pin(async move { Outcome::from_result(Self::run(ctx).await) })
    }
}
