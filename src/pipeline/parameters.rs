//! Build parameters
//!
//! Pipelines declare typed parameters with defaults; a trigger supplies
//! values that override them. The merged map is what conditions and
//! expressions see during a run.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::Validate;
use super::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// A single parameter value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag
    Bool(bool),
    /// Free-form or choice value
    String(String),
}

impl ParamValue {
    /// Parses a raw command-line value, recognising `true` / `false`
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            other => Self::String(other.to_string()),
        }
    }

    /// Text form used in expressions and environment bindings
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Bool(true) => Cow::Borrowed("true"),
            Self::Bool(false) => Cow::Borrowed("false"),
            Self::String(s) => Cow::Borrowed(s),
        }
    }

    /// Truthiness as seen by `when { params.X }`
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::String(s) => super::expression::is_truthy(s),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Parameter values of one run, keyed by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, ParamValue>);

impl Parameters {
    /// Creates an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value
    pub fn set(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Inserts a value in place
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Looks up a value
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Iterates values in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no values are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses `NAME=VALUE` pairs as given on the command line
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidNameChars`] for a pair without `=`
    /// or with an empty name.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut params = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            match pair.split_once('=') {
                Some((name, value)) if !name.trim().is_empty() => {
                    params.insert(name.trim(), ParamValue::parse(value));
                }
                _ => {
                    return Err(ValidationError::InvalidNameChars {
                        name: pair.to_string(),
                    });
                }
            }
        }
        Ok(params)
    }
}

/// Declared parameter in a pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterDefinition {
    /// Boolean parameter
    Boolean {
        /// Parameter name
        name: String,
        /// Value when the trigger does not supply one
        #[serde(default)]
        default: bool,
        /// Human-readable description
        #[serde(skip_serializing_if = "Option::is_none", default)]
        description: Option<String>,
    },

    /// String parameter
    String {
        /// Parameter name
        name: String,
        /// Value when the trigger does not supply one
        #[serde(default)]
        default: String,
        /// Human-readable description
        #[serde(skip_serializing_if = "Option::is_none", default)]
        description: Option<String>,
    },

    /// Choice parameter; the first choice is the default
    Choice {
        /// Parameter name
        name: String,
        /// Allowed values
        choices: Vec<String>,
        /// Human-readable description
        #[serde(skip_serializing_if = "Option::is_none", default)]
        description: Option<String>,
    },
}

impl ParameterDefinition {
    /// Declares a boolean parameter
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self::Boolean {
            name: name.into(),
            default,
            description: None,
        }
    }

    /// Declares a string parameter
    pub fn string(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::String {
            name: name.into(),
            default: default.into(),
            description: None,
        }
    }

    /// Declares a choice parameter
    pub fn choice(name: impl Into<String>, choices: Vec<String>) -> Self {
        Self::Choice {
            name: name.into(),
            choices,
            description: None,
        }
    }

    /// Parameter name
    pub fn name(&self) -> &str {
        match self {
            Self::Boolean { name, .. } | Self::String { name, .. } | Self::Choice { name, .. } => {
                name
            }
        }
    }

    /// Default value
    pub fn default_value(&self) -> ParamValue {
        match self {
            Self::Boolean { default, .. } => ParamValue::Bool(*default),
            Self::String { default, .. } => ParamValue::String(default.clone()),
            Self::Choice { choices, .. } => {
                ParamValue::String(choices.first().cloned().unwrap_or_default())
            }
        }
    }

    /// Coerces a supplied value to this definition's type
    fn coerce(&self, value: &ParamValue) -> Result<ParamValue, ValidationError> {
        let invalid = || ValidationError::InvalidParameter {
            name: self.name().to_string(),
            value: value.to_string(),
        };

        match (self, value) {
            (Self::Boolean { .. }, ParamValue::Bool(b)) => Ok(ParamValue::Bool(*b)),
            (Self::Boolean { .. }, ParamValue::String(s)) => match s.as_str() {
                "true" => Ok(ParamValue::Bool(true)),
                "false" => Ok(ParamValue::Bool(false)),
                _ => Err(invalid()),
            },
            (Self::String { .. }, v) => Ok(ParamValue::String(v.as_text().into_owned())),
            (Self::Choice { choices, .. }, v) => {
                let text = v.as_text();
                if choices.iter().any(|c| *c == text) {
                    Ok(ParamValue::String(text.into_owned()))
                } else {
                    Err(invalid())
                }
            }
        }
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

impl Validate for ParameterDefinition {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if !valid_name(self.name()) {
            return Err(ValidationError::InvalidNameChars {
                name: self.name().to_string(),
            });
        }

        if let Self::Choice { choices, name, .. } = self
            && choices.is_empty()
        {
            return Err(ValidationError::InvalidParameter {
                name: name.clone(),
                value: String::new(),
            });
        }

        Ok(())
    }
}

/// Merges declared defaults with supplied values; supplied values win
///
/// Values for undeclared names pass through unchanged.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidParameter`] when a supplied value does
/// not fit its declaration.
pub fn resolve(
    definitions: &[ParameterDefinition],
    supplied: &Parameters,
) -> Result<Parameters, ValidationError> {
    let mut resolved = supplied.clone();

    for definition in definitions {
        let value = match supplied.get(definition.name()) {
            Some(value) => definition.coerce(value)?,
            None => definition.default_value(),
        };
        resolved.insert(definition.name(), value);
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_param_value_parse_and_truthiness() {
        assert_eq!(ParamValue::parse("true"), ParamValue::Bool(true));
        assert_eq!(ParamValue::parse("main"), ParamValue::from("main"));
        assert!(ParamValue::from("yes").is_truthy());
        assert!(!ParamValue::from("false").is_truthy());
        assert!(!ParamValue::Bool(false).is_truthy());
    }

    #[test]
    fn test_from_pairs() {
        let params = Parameters::from_pairs(["PUSH=true", "TARGET=staging", "EMPTY="]).unwrap();
        assert_eq!(params.get("PUSH"), Some(&ParamValue::Bool(true)));
        assert_eq!(params.get("TARGET"), Some(&ParamValue::from("staging")));
        assert_eq!(params.get("EMPTY"), Some(&ParamValue::from("")));
        assert!(Parameters::from_pairs(["novalue"]).is_err());
        assert!(Parameters::from_pairs(["=x"]).is_err());
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let defs = vec![
            ParameterDefinition::boolean("PUSH_IMAGE", false),
            ParameterDefinition::string("REGISTRY", "registry.local"),
            ParameterDefinition::choice("TARGET", vec!["dev".into(), "prod".into()]),
        ];
        let resolved = resolve(&defs, &Parameters::new()).unwrap();

        assert_eq!(resolved.get("PUSH_IMAGE"), Some(&ParamValue::Bool(false)));
        assert_eq!(resolved.get("REGISTRY"), Some(&ParamValue::from("registry.local")));
        assert_eq!(resolved.get("TARGET"), Some(&ParamValue::from("dev")));
    }

    #[test]
    fn test_resolve_supplied_values_win_and_are_coerced() {
        let defs = vec![
            ParameterDefinition::boolean("PUSH_IMAGE", false),
            ParameterDefinition::choice("TARGET", vec!["dev".into(), "prod".into()]),
        ];
        let supplied = Parameters::new()
            .set("PUSH_IMAGE", "true")
            .set("TARGET", "prod")
            .set("EXTRA", "kept");
        let resolved = resolve(&defs, &supplied).unwrap();

        assert_eq!(resolved.get("PUSH_IMAGE"), Some(&ParamValue::Bool(true)));
        assert_eq!(resolved.get("TARGET"), Some(&ParamValue::from("prod")));
        assert_eq!(resolved.get("EXTRA"), Some(&ParamValue::from("kept")));
    }

    #[test]
    fn test_resolve_rejects_bad_values() {
        let defs = vec![
            ParameterDefinition::boolean("PUSH_IMAGE", false),
            ParameterDefinition::choice("TARGET", vec!["dev".into()]),
        ];
        let bad_bool = Parameters::new().set("PUSH_IMAGE", "maybe");
        assert!(matches!(
            resolve(&defs, &bad_bool),
            Err(ValidationError::InvalidParameter { .. })
        ));

        let bad_choice = Parameters::new().set("TARGET", "prod");
        assert!(resolve(&defs, &bad_choice).is_err());
    }

    #[test]
    fn test_definition_validation() {
        assert!(ParameterDefinition::boolean("DEPLOY", true).validate().is_ok());
        assert!(ParameterDefinition::boolean("bad name", true).validate().is_err());
        assert!(ParameterDefinition::choice("T", vec![]).validate().is_err());
    }

    #[test]
    fn test_definition_yaml() {
        let yaml = r"
- type: boolean
  name: PUSH_IMAGE
- type: choice
  name: TARGET
  choices: [dev, prod]
";
        let defs: Vec<ParameterDefinition> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(defs[0], ParameterDefinition::boolean("PUSH_IMAGE", false));
        assert_eq!(defs[1].default_value(), ParamValue::from("dev"));
    }
}
