use std::sync::Arc;

use anyhow::Result;
use strum_macros::Display;

use super::{
    base::Provider, configs::ProviderConfig, fee::FeeNegotiatingProvider,
    standard::StandardProvider,
};

/// Tag the inbound `llm` parameter uses to select the fee-negotiating provider
pub const FEE_PROVIDER_TAG: &str = "0g";

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "kebab-case")]
pub enum ProviderKind {
    Standard,
    FeeNegotiating,
}

impl ProviderKind {
    /// Resolve the provider named by a request tag. Anything but the fee tag is standard.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(str::trim) {
            Some(tag) if tag.eq_ignore_ascii_case(FEE_PROVIDER_TAG) => ProviderKind::FeeNegotiating,
            _ => ProviderKind::Standard,
        }
    }
}

pub fn get_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::Standard(standard_config) => {
            Ok(Arc::new(StandardProvider::new(standard_config)?))
        }
        ProviderConfig::FeeNegotiating(fee_config) => {
            Ok(Arc::new(FeeNegotiatingProvider::new(fee_config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::ModelSettings;
    use crate::providers::configs::{FeeProviderConfig, StandardProviderConfig};

    #[test]
    fn test_provider_kind_from_tag() {
        assert_eq!(ProviderKind::from_tag(Some("0g")), ProviderKind::FeeNegotiating);
        assert_eq!(ProviderKind::from_tag(Some(" 0G ")), ProviderKind::FeeNegotiating);
        assert_eq!(ProviderKind::from_tag(Some("nillion")), ProviderKind::Standard);
        assert_eq!(ProviderKind::from_tag(None), ProviderKind::Standard);
        assert_eq!(ProviderKind::FeeNegotiating.to_string(), "fee-negotiating");
    }

    #[test]
    fn test_get_provider_builds_each_kind() -> Result<()> {
        let standard = get_provider(ProviderConfig::Standard(StandardProviderConfig::new(
            "http://localhost:1",
            "key",
            ModelSettings::new("llama"),
        )))?;
        assert_eq!(standard.kind(), ProviderKind::Standard);

        let fee = get_provider(ProviderConfig::FeeNegotiating(FeeProviderConfig::new(
            "http://localhost:2",
            "0xprovider",
            0.001,
            ModelSettings::new("og-basic"),
        )))?;
        assert_eq!(fee.kind(), ProviderKind::FeeNegotiating);
        Ok(())
    }

    #[test]
    fn test_get_provider_rejects_invalid_settings() {
        let mut settings = ModelSettings::new("llama");
        settings.top_p = 3.0;
        let result = get_provider(ProviderConfig::Standard(StandardProviderConfig::new(
            "http://localhost:1",
            "key",
            settings,
        )));
        assert!(result.is_err());
    }
}
