//! Site edit event

use telemetry_core::config::SiteConfig;
use telemetry_core::message::EventParams;

/// Action reported when a site is opened for editing
pub const SITE_EDIT_ACTION: &str = "wordpress.edit";

/// Builder type of sites generated by the AI builder
const AI_BUILDER_TYPE: &str = "ai";

/// Site identity sent with the edit event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteEditEvent {
    pub builder_type: String,
    pub website_id: String,
    pub subscription_id: String,
    pub ai_version: String,
}

impl SiteEditEvent {
    pub fn from_site(site: &SiteConfig) -> Self {
        Self {
            builder_type: site.builder_type.trim().to_string(),
            website_id: site.website_id.trim().to_string(),
            subscription_id: site.subscription_id.trim().to_string(),
            ai_version: site.ai_version.trim().to_string(),
        }
    }

    /// All identifiers known, and for AI-built sites the site was generated
    pub fn is_eligible(&self) -> bool {
        if self.builder_type.is_empty() || self.website_id.is_empty() || self.subscription_id.is_empty()
        {
            return false;
        }
        !(self.builder_type == AI_BUILDER_TYPE && self.ai_version.is_empty())
    }

    pub fn to_params(&self) -> EventParams {
        EventParams::new(SITE_EDIT_ACTION)
            .with_field("wp_builder_type", self.builder_type.as_str())
            .with_field("website_id", self.website_id.as_str())
            .with_field("subscription_id", self.subscription_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(builder: &str, ai_version: &str) -> SiteConfig {
        SiteConfig {
            builder_type: builder.to_string(),
            website_id: "w-1".to_string(),
            subscription_id: "s-1".to_string(),
            ai_version: ai_version.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_eligibility() {
        assert!(SiteEditEvent::from_site(&site("prebuilt", "")).is_eligible());
        assert!(SiteEditEvent::from_site(&site("ai", "v2")).is_eligible());
        assert!(!SiteEditEvent::from_site(&site("ai", "")).is_eligible());
        assert!(!SiteEditEvent::from_site(&site("", "")).is_eligible());

        let mut missing = site("prebuilt", "");
        missing.subscription_id = " ".to_string();
        assert!(!SiteEditEvent::from_site(&missing).is_eligible());
    }

    #[test]
    fn test_params() {
        let params = SiteEditEvent::from_site(&site("prebuilt", "")).to_params();
        assert_eq!(params.action(), Some(SITE_EDIT_ACTION));
        assert_eq!(params.fields()["wp_builder_type"], "prebuilt");
        assert_eq!(params.fields()["website_id"], "w-1");
        assert_eq!(params.fields()["subscription_id"], "s-1");
        assert!(params.fields().get("ai_version").is_none());
    }
}
