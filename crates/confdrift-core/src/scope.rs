use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("{field} is required")]
    Empty { field: &'static str },
    #[error("{field} must not contain ':' (got '{value}')")]
    ReservedSeparator { field: &'static str, value: String },
}

/// A validated `(tenant_id, cloud_id)` pair. Every store key is prefixed by
/// it, and the `:` separator is rejected so that no two scopes share a
/// prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantScope {
    tenant_id: String,
    cloud_id: String,
}

impl TenantScope {
    pub fn new(
        tenant_id: impl Into<String>,
        cloud_id: impl Into<String>,
    ) -> Result<Self, ScopeError> {
        let tenant_id = validate_part("tenant_id", tenant_id.into())?;
        let cloud_id = validate_part("cloud_id", cloud_id.into())?;
        Ok(Self {
            tenant_id,
            cloud_id,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn cloud_id(&self) -> &str {
        &self.cloud_id
    }
}

fn validate_part(field: &'static str, value: String) -> Result<String, ScopeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ScopeError::Empty { field });
    }
    if trimmed.contains(':') {
        return Err(ScopeError::ReservedSeparator {
            field,
            value: trimmed.to_owned(),
        });
    }
    Ok(trimmed.to_owned())
}
