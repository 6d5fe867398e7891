//! Synthesis voices and the voice selection policy
//!
//! Selection is an ordered list of rules evaluated top to bottom against the
//! voices currently available; the first rule that matches a voice wins.

use serde::{Deserialize, Serialize};

/// A synthesis voice offered by the speech engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    /// Display name (e.g. "Google हिन्दी", "Microsoft Swara Online (Natural)")
    pub name: String,

    /// BCP-47 language tag (e.g. "hi-IN", "en-US")
    pub lang: String,

    /// Provider-specific voice identifier; falls back to `name` when absent
    #[serde(default)]
    pub id: Option<String>,
}

impl Voice {
    /// Create a voice whose provider id equals its name
    #[must_use]
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
            id: None,
        }
    }

    /// Identifier to pass to the synthesis provider
    #[must_use]
    pub fn provider_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// Designated high-quality voice for a detected response language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignatedVoice {
    /// Language label as sent by the assistant service (e.g. "HI", "EN")
    pub language: String,

    /// Exact language tag the voice must have
    pub lang: String,

    /// Fragment the voice name must contain
    pub name_contains: String,
}

/// How a single rule matches a voice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceMatcher {
    /// The designated voice for the response language, if one is configured
    Designated(Vec<DesignatedVoice>),

    /// Name contains the fragment and the tag is one of `langs`
    NamedInLanguages {
        name_contains: String,
        langs: Vec<String>,
    },

    /// Tag is one of `langs`
    InLanguages(Vec<String>),

    /// Tag starts with `family` and the name contains one of `name_hints`
    FamilyDefault {
        family: String,
        name_hints: Vec<String>,
    },

    /// Any voice
    Any,
}

impl VoiceMatcher {
    fn matches(&self, voice: &Voice, language: Option<&str>) -> bool {
        match self {
            Self::Designated(designated) => language
                .and_then(|label| {
                    designated
                        .iter()
                        .find(|d| d.language.eq_ignore_ascii_case(label))
                })
                .is_some_and(|d| voice.lang == d.lang && voice.name.contains(&d.name_contains)),
            Self::NamedInLanguages {
                name_contains,
                langs,
            } => voice.name.contains(name_contains.as_str()) && langs.contains(&voice.lang),
            Self::InLanguages(langs) => langs.contains(&voice.lang),
            Self::FamilyDefault { family, name_hints } => {
                voice.lang.starts_with(family.as_str())
                    && name_hints.iter().any(|hint| voice.name.contains(hint.as_str()))
            }
            Self::Any => true,
        }
    }
}

/// A named selection rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceRule {
    /// Short label used in logs and `apex voices`
    pub label: String,
    pub matcher: VoiceMatcher,
}

/// Ordered voice fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePolicy {
    rules: Vec<VoiceRule>,
}

impl VoicePolicy {
    /// Build a policy from explicit rules
    #[must_use]
    pub const fn new(rules: Vec<VoiceRule>) -> Self {
        Self { rules }
    }

    /// The standard five-step chain
    ///
    /// 1. designated voice for the detected language
    /// 2. "Natural" voice in an accepted language
    /// 3. any voice in an accepted language
    /// 4. a reasonable default for the base language family
    /// 5. the first available voice
    #[must_use]
    pub fn standard(
        designated: Vec<DesignatedVoice>,
        accepted_langs: Vec<String>,
        base_family: String,
        default_hints: Vec<String>,
    ) -> Self {
        Self::new(vec![
            VoiceRule {
                label: "designated".to_string(),
                matcher: VoiceMatcher::Designated(designated),
            },
            VoiceRule {
                label: "natural".to_string(),
                matcher: VoiceMatcher::NamedInLanguages {
                    name_contains: "Natural".to_string(),
                    langs: accepted_langs.clone(),
                },
            },
            VoiceRule {
                label: "accepted-language".to_string(),
                matcher: VoiceMatcher::InLanguages(accepted_langs),
            },
            VoiceRule {
                label: "family-default".to_string(),
                matcher: VoiceMatcher::FamilyDefault {
                    family: base_family,
                    name_hints: default_hints,
                },
            },
            VoiceRule {
                label: "first-available".to_string(),
                matcher: VoiceMatcher::Any,
            },
        ])
    }

    /// Rules in evaluation order
    #[must_use]
    pub fn rules(&self) -> &[VoiceRule] {
        &self.rules
    }

    /// Pick a voice for a reply in `language`
    ///
    /// Returns the chosen voice and the label of the rule that chose it, or
    /// `None` when no voices are available.
    #[must_use]
    pub fn select<'a>(
        &'a self,
        voices: &'a [Voice],
        language: Option<&str>,
    ) -> Option<(&'a Voice, &'a str)> {
        self.rules.iter().find_map(|rule| {
            voices
                .iter()
                .find(|v| rule.matcher.matches(v, language))
                .map(|v| (v, rule.label.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> VoicePolicy {
        VoicePolicy::standard(
            vec![DesignatedVoice {
                language: "HI".to_string(),
                lang: "hi-IN".to_string(),
                name_contains: "Google".to_string(),
            }],
            vec!["en-IN".to_string(), "hi-IN".to_string()],
            "en".to_string(),
            vec!["Female".to_string(), "Samantha".to_string()],
        )
    }

    #[test]
    fn designated_voice_wins_for_its_language() {
        let voices = vec![
            Voice::new("Microsoft Neerja Online (Natural)", "en-IN"),
            Voice::new("Google हिन्दी", "hi-IN"),
        ];
        let policy = policy();
        let (voice, rule) = policy.select(&voices, Some("HI")).unwrap();
        assert_eq!(voice.name, "Google हिन्दी");
        assert_eq!(rule, "designated");
    }

    #[test]
    fn natural_voice_used_when_language_has_no_designation() {
        let voices = vec![
            Voice::new("Google हिन्दी", "hi-IN"),
            Voice::new("Microsoft Neerja Online (Natural)", "en-IN"),
        ];
        let policy = policy();
        let (voice, rule) = policy.select(&voices, Some("EN")).unwrap();
        assert_eq!(voice.name, "Microsoft Neerja Online (Natural)");
        assert_eq!(rule, "natural");
    }

    #[test]
    fn falls_through_to_family_default_then_first() {
        let voices = vec![
            Voice::new("Daniel", "en-GB"),
            Voice::new("Samantha", "en-US"),
        ];
        let policy = policy();
        let (voice, rule) = policy.select(&voices, None).unwrap();
        assert_eq!(voice.name, "Samantha");
        assert_eq!(rule, "family-default");

        let voices = vec![Voice::new("Thomas", "fr-FR")];
        let (voice, rule) = policy.select(&voices, None).unwrap();
        assert_eq!(voice.name, "Thomas");
        assert_eq!(rule, "first-available");
    }

    #[test]
    fn empty_catalog_selects_nothing() {
        assert!(policy().select(&[], Some("EN")).is_none());
    }

    #[test]
    fn provider_id_falls_back_to_name() {
        let mut voice = Voice::new("alloy", "en-US");
        assert_eq!(voice.provider_id(), "alloy");
        voice.id = Some("21m00Tcm4TlvDq8ikWAM".to_string());
        assert_eq!(voice.provider_id(), "21m00Tcm4TlvDq8ikWAM");
    }
}
