use std::{fmt::Display, path::Path};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

const PLACEHOLDER_PREFIX: &'static str = "REPLACE_ME";

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitMode {
    #[default]
    #[serde(rename = "cors")]
    Cors,

    /// The response is opaque, so submissions are best-effort.
    #[serde(rename = "no-cors")]
    NoCors,
}

impl Display for SubmitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitMode::Cors => write!(f, "cors"),
            SubmitMode::NoCors => write!(f, "no-cors"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SurveyPart {
    Part1,
    Part2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part2Config {
    #[serde(rename = "numOld")]
    pub num_old: u32,

    #[serde(rename = "numLures")]
    pub num_lures: u32,
}

/// Deployment settings for the survey page. Load this once at startup and
/// hand references to whatever needs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyConfig {
    #[serde(rename = "submitUrl")]
    pub submit_url: String,

    #[serde(rename = "submitMode", default)]
    pub submit_mode: SubmitMode,

    // There are two generations of completion codes in deployed configs. We
    // keep both around and let callers decide which one they want.
    #[serde(rename = "completionCodePart1")]
    pub completion_code_part1: Option<String>,

    #[serde(rename = "completionCodePart2")]
    pub completion_code_part2: Option<String>,

    #[serde(rename = "completionCodePart1New")]
    pub completion_code_part1_new: Option<String>,

    #[serde(rename = "completionCodePart2New")]
    pub completion_code_part2_new: Option<String>,

    pub part2: Part2Config,
}

impl SurveyConfig {
    pub fn from_json_str<T: AsRef<str>>(json: T) -> Result<Self> {
        Ok(serde_json::from_str(json.as_ref())?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|err| anyhow!("Unable to read {}: {err}", path.display()))?;
        match Self::from_json_str(contents) {
            Ok(config) => Ok(config),
            Err(err) => Err(anyhow!("Failed to load {}: {}", path.display(), err)),
        }
    }

    /// Returns the completion code for `part`, falling back to the other
    /// generation of codes if the preferred one isn't set.
    pub fn completion_code(&self, part: SurveyPart, prefer_new: bool) -> Option<&str> {
        let (old, new) = match part {
            SurveyPart::Part1 => (&self.completion_code_part1, &self.completion_code_part1_new),
            SurveyPart::Part2 => (&self.completion_code_part2, &self.completion_code_part2_new),
        };
        let (preferred, fallback) = if prefer_new { (new, old) } else { (old, new) };
        preferred.as_deref().or(fallback.as_deref())
    }

    /// Names of completion code fields still holding a placeholder value.
    pub fn unconfigured_completion_codes(&self) -> Vec<&'static str> {
        let fields = [
            ("completionCodePart1", &self.completion_code_part1),
            ("completionCodePart2", &self.completion_code_part2),
            ("completionCodePart1New", &self.completion_code_part1_new),
            ("completionCodePart2New", &self.completion_code_part2_new),
        ];
        fields
            .into_iter()
            .filter(|(_, code)| match code {
                Some(code) => code.starts_with(PLACEHOLDER_PREFIX),
                None => false,
            })
            .map(|(name, _)| name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::survey_config::{SubmitMode, SurveyConfig, SurveyPart};

    const CONFIG_JSON: &'static str = r#"{
        "submitUrl": "https://script.example.com/macros/s/abc/exec",
        "submitMode": "no-cors",
        "completionCodePart1": "C1J3ZVQ3",
        "completionCodePart2": "REPLACE_ME_PART2",
        "completionCodePart1New": "REPLACE_ME_PART1_NEW",
        "completionCodePart2New": "REPLACE_ME_PART2_NEW",
        "part2": { "numOld": 20, "numLures": 20 }
    }"#;

    #[test]
    fn test_from_json_str_works() {
        let config = SurveyConfig::from_json_str(CONFIG_JSON).unwrap();
        assert_eq!(config.submit_url, "https://script.example.com/macros/s/abc/exec");
        assert_eq!(config.submit_mode, SubmitMode::NoCors);
        assert_eq!(config.completion_code_part1.as_deref(), Some("C1J3ZVQ3"));
        assert_eq!(config.part2.num_old, 20);
        assert_eq!(config.part2.num_lures, 20);
    }

    #[test]
    fn test_submit_mode_defaults_to_cors() {
        let config = SurveyConfig::from_json_str(
            r#"{"submitUrl": "http://localhost:8000/submit", "part2": {"numOld": 1, "numLures": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.submit_mode, SubmitMode::Cors);
        assert_eq!(config.completion_code(SurveyPart::Part1, false), None);
    }

    #[test]
    fn test_unknown_submit_mode_is_rejected() {
        let json = CONFIG_JSON.replace("\"no-cors\"", "\"same-origin\"");
        assert!(SurveyConfig::from_json_str(json).is_err());
    }

    #[test]
    fn test_completion_code_falls_back() {
        let mut config = SurveyConfig::from_json_str(CONFIG_JSON).unwrap();
        assert_eq!(config.completion_code(SurveyPart::Part1, false), Some("C1J3ZVQ3"));
        assert_eq!(
            config.completion_code(SurveyPart::Part1, true),
            Some("REPLACE_ME_PART1_NEW")
        );
        config.completion_code_part1_new = None;
        assert_eq!(config.completion_code(SurveyPart::Part1, true), Some("C1J3ZVQ3"));
        assert_eq!(
            config.completion_code(SurveyPart::Part2, false),
            Some("REPLACE_ME_PART2")
        );
    }

    #[test]
    fn test_unconfigured_completion_codes_works() {
        let config = SurveyConfig::from_json_str(CONFIG_JSON).unwrap();
        assert_eq!(
            config.unconfigured_completion_codes(),
            vec![
                "completionCodePart2",
                "completionCodePart1New",
                "completionCodePart2New"
            ]
        );
    }

    #[test]
    fn test_load_reports_path_on_failure() {
        let path = std::env::temp_dir().join("survey-config-test-broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = SurveyConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("survey-config-test-broken.json"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_submit_mode_display_matches_json() {
        assert_eq!(SubmitMode::Cors.to_string(), "cors");
        assert_eq!(SubmitMode::NoCors.to_string(), "no-cors");
        assert_eq!(serde_json::to_string(&SubmitMode::NoCors).unwrap(), "\"no-cors\"");
    }
}
