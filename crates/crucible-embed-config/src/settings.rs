//! User-facing settings for the overlay

use crate::error::{ConfigError, ValidationError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Title bar font size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum FontSize {
    /// 12 pixels
    #[serde(rename = "12px")]
    Px12,
    /// 13 pixels
    #[serde(rename = "13px")]
    Px13,
    /// 14 pixels
    #[default]
    #[serde(rename = "14px")]
    Px14,
    /// 15 pixels
    #[serde(rename = "15px")]
    Px15,
    /// 16 pixels
    #[serde(rename = "16px")]
    Px16,
    /// 18 pixels
    #[serde(rename = "18px")]
    Px18,
    /// 20 pixels
    #[serde(rename = "20px")]
    Px20,
}

impl FontSize {
    /// Every selectable size, smallest first.
    pub const ALL: [FontSize; 7] = [
        Self::Px12,
        Self::Px13,
        Self::Px14,
        Self::Px15,
        Self::Px16,
        Self::Px18,
        Self::Px20,
    ];

    /// Size in pixels
    pub fn pixels(self) -> u8 {
        match self {
            Self::Px12 => 12,
            Self::Px13 => 13,
            Self::Px14 => 14,
            Self::Px15 => 15,
            Self::Px16 => 16,
            Self::Px18 => 18,
            Self::Px20 => 20,
        }
    }

    /// CSS value, e.g. `"14px"`
    pub fn as_css(self) -> String {
        format!("{}px", self.pixels())
    }

    /// Parse a CSS pixel value such as `"16px"` or `"16"`.
    pub fn from_css(value: &str) -> Option<Self> {
        let trimmed = value.trim().trim_end_matches("px");
        let px: u8 = trimmed.parse().ok()?;
        Self::ALL.into_iter().find(|size| size.pixels() == px)
    }
}

/// Settings exposed through the settings panel.
///
/// Field names are camelCase in the persisted blob. Every field has a default so
/// blobs written by older versions still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbedSettings {
    /// Title bar font size
    pub font_size: FontSize,
    /// Show the collapse/expand icon in the title bar
    pub show_collapse_icon: bool,
    /// Show the in-place edit button
    pub show_edit_button: bool,
    /// Show the jump-to-source button
    pub show_jump_button: bool,
    /// Open the jump target in a new tab instead of the current view
    pub jump_in_new_tab: bool,
    /// Only save on explicit request (and once more when leaving the editor)
    pub manual_save_only: bool,
    /// Debounce delay for automatic saves, in milliseconds
    pub auto_save_delay: u64,
    /// Verbose pass reporting
    pub debug_mode: bool,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self {
            font_size: FontSize::Px14,
            show_collapse_icon: true,
            show_edit_button: true,
            show_jump_button: true,
            jump_in_new_tab: true,
            manual_save_only: false,
            auto_save_delay: 1000,
            debug_mode: false,
        }
    }
}

impl EmbedSettings {
    /// Accepted range for [`EmbedSettings::auto_save_delay`]
    pub const AUTO_SAVE_DELAY_RANGE: std::ops::RangeInclusive<u64> = 100..=60_000;

    /// Debounce delay as a [`Duration`]
    pub fn auto_save_delay(&self) -> Duration {
        Duration::from_millis(self.auto_save_delay)
    }

    /// Clamp out-of-range values into their accepted ranges.
    pub fn sanitized(mut self) -> Self {
        let range = Self::AUTO_SAVE_DELAY_RANGE;
        self.auto_save_delay = self.auto_save_delay.clamp(*range.start(), *range.end());
        self
    }

    /// Validate the settings, reporting every failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let errors = SettingsValidator::collect(self);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

/// Validation rules for [`EmbedSettings`].
pub struct SettingsValidator;

impl SettingsValidator {
    /// Collect all validation failures for `settings`.
    pub fn collect(settings: &EmbedSettings) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let range = EmbedSettings::AUTO_SAVE_DELAY_RANGE;
        if !range.contains(&settings.auto_save_delay) {
            errors.push(ValidationError::OutOfRange {
                field: "autoSaveDelay",
                value: settings.auto_save_delay,
                min: *range.start(),
                max: *range.end(),
            });
        }

        errors
    }

    /// JSON schema describing the settings blob, for building a settings form.
    pub fn schema() -> serde_json::Value {
        let schema = schemars::schema_for!(EmbedSettings);
        serde_json::to_value(&schema).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_defaults() {
        let settings = EmbedSettings::default();
        assert_eq!(settings.font_size, FontSize::Px14);
        assert!(settings.show_collapse_icon);
        assert!(settings.show_edit_button);
        assert!(settings.show_jump_button);
        assert!(settings.jump_in_new_tab);
        assert!(!settings.manual_save_only);
        assert_eq!(settings.auto_save_delay, 1000);
        assert!(!settings.debug_mode);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_camel_case_field_names() {
        let json = serde_json::to_value(EmbedSettings::default()).unwrap();
        assert_eq!(json["fontSize"], "14px");
        assert_eq!(json["showCollapseIcon"], true);
        assert_eq!(json["autoSaveDelay"], 1000);
        assert_eq!(json["manualSaveOnly"], false);
    }

    #[test]
    fn test_partial_blob_uses_defaults() {
        let settings: EmbedSettings =
            serde_json::from_str(r#"{ "fontSize": "18px", "manualSaveOnly": true }"#).unwrap();
        assert_eq!(settings.font_size, FontSize::Px18);
        assert!(settings.manual_save_only);
        assert_eq!(settings.auto_save_delay, 1000);
        assert!(settings.show_jump_button);
    }

    #[test_case(50, false ; "below minimum")]
    #[test_case(100, true ; "minimum")]
    #[test_case(2500, true ; "typical")]
    #[test_case(60_000, true ; "maximum")]
    #[test_case(120_000, false ; "above maximum")]
    fn test_auto_save_delay_validation(delay: u64, valid: bool) {
        let settings = EmbedSettings {
            auto_save_delay: delay,
            ..Default::default()
        };
        assert_eq!(settings.validate().is_ok(), valid);
    }

    #[test]
    fn test_sanitized_clamps_delay() {
        let settings = EmbedSettings {
            auto_save_delay: 5,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(settings.auto_save_delay, 100);
    }

    #[test]
    fn test_font_size_css_round_trip() {
        for size in FontSize::ALL {
            assert_eq!(FontSize::from_css(&size.as_css()), Some(size));
        }
        assert_eq!(FontSize::from_css("17px"), None);
        assert_eq!(FontSize::from_css("16"), Some(FontSize::Px16));
    }

    #[test]
    fn test_schema_lists_settings() {
        let schema = SettingsValidator::schema();
        let properties = schema["properties"].as_object().expect("object schema");
        assert!(properties.contains_key("fontSize"));
        assert!(properties.contains_key("autoSaveDelay"));
        assert!(properties.contains_key("debugMode"));
    }
}
