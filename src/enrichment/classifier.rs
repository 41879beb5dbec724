//! Classifier capability
//!
//! The catalog carries machine-generated conflict/nation/item-type labels.
//! The classifier itself is an external capability behind this trait; the
//! crawler runs fine without one, and individual labels can be switched
//! off through environment variables without touching configuration files.

use anyhow::Result;
use async_trait::async_trait;

pub const ML_DISABLE_ITEM_TYPE: &str = "ML_DISABLE_ITEM_TYPE";
pub const ML_DISABLE_CONFLICT: &str = "ML_DISABLE_CONFLICT";
pub const ML_DISABLE_NATION: &str = "ML_DISABLE_NATION";

/// Classifier output for one product.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub conflict: Option<String>,
    pub nation: Option<String>,
    pub item_type: Option<String>,
    pub supergroup: Option<String>,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        title: &str,
        description: &str,
        image_url: Option<&str>,
    ) -> Result<Classification>;
}

/// `1`, `true`, `yes`, or `on` (any case) disables the label.
pub fn label_disabled(var_name: &str) -> bool {
    match std::env::var(var_name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

/// Drop the labels the environment has switched off.
pub fn apply_label_gates(mut classification: Classification) -> Classification {
    if label_disabled(ML_DISABLE_ITEM_TYPE) {
        classification.item_type = None;
    }
    if label_disabled(ML_DISABLE_CONFLICT) {
        classification.conflict = None;
    }
    if label_disabled(ML_DISABLE_NATION) {
        classification.nation = None;
    }
    classification
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_disabled_accepts_the_usual_spellings() {
        let var = "ML_DISABLE_TEST_LABEL";
        for value in ["1", "true", "YES", "on"] {
            std::env::set_var(var, value);
            assert!(label_disabled(var), "{value} should disable");
        }
        for value in ["0", "false", "off", ""] {
            std::env::set_var(var, value);
            assert!(!label_disabled(var), "{value} should not disable");
        }
        std::env::remove_var(var);
        assert!(!label_disabled(var));
    }
}
