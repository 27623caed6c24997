//! Control-intent classification for inbound text.
//!
//! Patterns are compiled once per bot name and checked in a fixed order:
//! reset, personality set, personality get, model set, model get, chat.
//! The first match wins.

use regex::{Captures, Regex};

use crate::relay::registry::Scope;

/// Scope argument of a get command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    At(Scope),
    /// Whatever wins after inheritance.
    Effective,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ignore,
    ResetConversation,
    SetPersonality { scope: Scope, text: String },
    GetPersonality { scope: Lookup },
    SetModel { scope: Scope, name: String },
    GetModel { scope: Lookup },
    ChatQuery { text: String },
}

impl Command {
    /// The get that confirms a set command's new value.
    pub fn follow_up(&self) -> Option<Command> {
        match self {
            Command::SetPersonality { scope, .. } => Some(Command::GetPersonality {
                scope: Lookup::At(*scope),
            }),
            Command::SetModel { scope, .. } => Some(Command::GetModel {
                scope: Lookup::At(*scope),
            }),
            _ => None,
        }
    }
}

struct SettingPatterns {
    set: Regex,
    get: Regex,
}

impl SettingPatterns {
    fn new(keyword: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            set: Regex::new(&format!(
                r"(?i)^{keyword}[-\s]*(?:set|update)[-\s]*(conversation|channel|global)\b[\s:=,.\-]*"
            ))?,
            get: Regex::new(&format!(
                r"(?i)^{keyword}(?:[-\s]*get(?:[-\s]*(conversation|channel|global))?)?[^\p{{L}}\p{{N}}]*$"
            ))?,
        })
    }

    /// Scope plus the trimmed value that follows the command words.
    fn match_set(&self, text: &str) -> Option<(Scope, String)> {
        let caps = self.set.captures(text)?;
        let scope = scope_from(&caps)?;
        let end = caps.get(0)?.end();
        Some((scope, text[end..].trim().to_string()))
    }

    fn match_get(&self, text: &str) -> Option<Lookup> {
        let caps = self.get.captures(text)?;
        Some(match scope_from(&caps) {
            Some(scope) => Lookup::At(scope),
            None => Lookup::Effective,
        })
    }
}

fn scope_from(caps: &Captures<'_>) -> Option<Scope> {
    let word = caps.get(1)?.as_str().to_ascii_lowercase();
    match word.as_str() {
        "conversation" => Some(Scope::Conversation),
        "channel" => Some(Scope::Channel),
        "global" => Some(Scope::Global),
        _ => None,
    }
}

pub struct Classifier {
    leading_name: Regex,
    trailing_name: Regex,
    reset: Regex,
    personality: SettingPatterns,
    model: SettingPatterns,
}

impl Classifier {
    pub fn new(bot_name: &str) -> Result<Self, regex::Error> {
        let name = regex::escape(bot_name.trim());
        Ok(Self {
            // Apostrophes and letters in any script do not separate the name.
            leading_name: Regex::new(&format!(r"(?i)^\s*@?{name}(?:[\s,:;.!?\-]+|$)"))?,
            trailing_name: Regex::new(&format!(r"(?i)(?:^|[\s,]+)@?{name}[\s.!?]*$"))?,
            reset: Regex::new(r"(?i)^reset[^\p{L}\p{N}]*$")?,
            personality: SettingPatterns::new("personality")?,
            model: SettingPatterns::new("model")?,
        })
    }

    /// Classify one message.
    ///
    /// `addressed` is true for private channels and for guild messages that
    /// mention the bot. Mention tokens must already be replaced by names.
    pub fn classify(&self, text: &str, addressed: bool) -> Command {
        if !addressed {
            return Command::Ignore;
        }

        let query = self.strip_name(text);
        if query.is_empty() {
            return Command::Ignore;
        }

        if self.reset.is_match(query) {
            return Command::ResetConversation;
        }
        if let Some((scope, text)) = self.personality.match_set(query) {
            return Command::SetPersonality { scope, text };
        }
        if let Some(scope) = self.personality.match_get(query) {
            return Command::GetPersonality { scope };
        }
        if let Some((scope, name)) = self.model.match_set(query) {
            return Command::SetModel { scope, name };
        }
        if let Some(scope) = self.model.match_get(query) {
            return Command::GetModel { scope };
        }

        Command::ChatQuery {
            text: query.to_string(),
        }
    }

    /// Drop the bot's name when used as a leading or, failing that, a
    /// trailing address.
    fn strip_name<'a>(&self, text: &'a str) -> &'a str {
        let text = text.trim();
        if let Some(m) = self.leading_name.find(text) {
            return text[m.end()..].trim();
        }
        if let Some(m) = self.trailing_name.find(text) {
            return text[..m.start()].trim();
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new("Maru").unwrap()
    }

    fn chat(text: &str) -> Command {
        Command::ChatQuery { text: text.to_string() }
    }

    #[test]
    fn test_unaddressed_is_ignored() {
        assert_eq!(classifier().classify("maru reset", false), Command::Ignore);
    }

    #[test]
    fn test_name_only_is_ignored() {
        let c = classifier();
        assert_eq!(c.classify("maru", true), Command::Ignore);
        assert_eq!(c.classify("  @Maru!  ", true), Command::Ignore);
        assert_eq!(c.classify("   ", true), Command::Ignore);
    }

    #[test]
    fn test_reset_variants() {
        let c = classifier();
        for text in ["maru reset", "MARU, reset!", "reset", "maru: RESET.", "@maru reset"] {
            assert_eq!(c.classify(text, true), Command::ResetConversation, "{text}");
        }
        assert_eq!(c.classify("maru reset everything", true), chat("reset everything"));
    }

    #[test]
    fn test_leading_and_trailing_name_are_stripped() {
        let c = classifier();
        assert_eq!(c.classify("maru hello", true), chat("hello"));
        assert_eq!(c.classify("hello maru", true), chat("hello"));
        assert_eq!(c.classify("hello, Maru!", true), chat("hello"));
        assert_eq!(c.classify("hello there", true), chat("hello there"));
    }

    #[test]
    fn test_trailing_name_kept_after_leading_address() {
        assert_eq!(
            classifier().classify("maru personality set-channel a cat named maru", true),
            Command::SetPersonality {
                scope: Scope::Channel,
                text: "a cat named maru".to_string()
            }
        );
    }

    #[test]
    fn test_name_inside_word_is_kept() {
        let c = classifier();
        assert_eq!(c.classify("marumaki rolls", true), chat("marumaki rolls"));
    }

    #[test]
    fn test_set_personality_scopes() {
        let c = classifier();
        assert_eq!(
            c.classify("maru personality-set-channel grumpy pirate", true),
            Command::SetPersonality {
                scope: Scope::Channel,
                text: "grumpy pirate".to_string()
            }
        );
        assert_eq!(
            c.classify("maru personality set conversation: A Polite Butler  ", true),
            Command::SetPersonality {
                scope: Scope::Conversation,
                text: "A Polite Butler".to_string()
            }
        );
        assert_eq!(
            c.classify("Maru, Personality Update-Global a dog", true),
            Command::SetPersonality {
                scope: Scope::Global,
                text: "a dog".to_string()
            }
        );
    }

    #[test]
    fn test_set_with_empty_value() {
        assert_eq!(
            classifier().classify("maru personality set-channel", true),
            Command::SetPersonality {
                scope: Scope::Channel,
                text: String::new()
            }
        );
    }

    #[test]
    fn test_get_personality() {
        let c = classifier();
        assert_eq!(
            c.classify("maru personality", true),
            Command::GetPersonality { scope: Lookup::Effective }
        );
        assert_eq!(
            c.classify("maru personality get?", true),
            Command::GetPersonality { scope: Lookup::Effective }
        );
        assert_eq!(
            c.classify("maru personality get-channel", true),
            Command::GetPersonality {
                scope: Lookup::At(Scope::Channel)
            }
        );
        assert_eq!(
            c.classify("maru personality get global", true),
            Command::GetPersonality {
                scope: Lookup::At(Scope::Global)
            }
        );
    }

    #[test]
    fn test_model_commands() {
        let c = classifier();
        assert_eq!(
            c.classify("maru model set-conversation my-model-2", true),
            Command::SetModel {
                scope: Scope::Conversation,
                name: "my-model-2".to_string()
            }
        );
        assert_eq!(
            c.classify("maru model", true),
            Command::GetModel { scope: Lookup::Effective }
        );
        assert_eq!(
            c.classify("maru model get-conversation", true),
            Command::GetModel {
                scope: Lookup::At(Scope::Conversation)
            }
        );
    }

    #[test]
    fn test_set_wins_over_get_and_chat() {
        // A set whose value happens to read like another command.
        let c = classifier();
        assert_eq!(
            c.classify("maru personality set-channel personality get-channel", true),
            Command::SetPersonality {
                scope: Scope::Channel,
                text: "personality get-channel".to_string()
            }
        );
        assert_eq!(
            c.classify("maru personality set-global model set-global x", true),
            Command::SetPersonality {
                scope: Scope::Global,
                text: "model set-global x".to_string()
            }
        );
    }

    #[test]
    fn test_incomplete_commands_fall_through_to_chat() {
        let c = classifier();
        assert_eq!(c.classify("maru personality set grumpy", true), chat("personality set grumpy"));
        assert_eq!(
            c.classify("maru personality is important", true),
            chat("personality is important")
        );
        assert_eq!(c.classify("maru model trains are fun", true), chat("model trains are fun"));
    }

    #[test]
    fn test_follow_up_after_set() {
        let set = Command::SetModel {
            scope: Scope::Global,
            name: "x".to_string(),
        };
        assert_eq!(
            set.follow_up(),
            Some(Command::GetModel {
                scope: Lookup::At(Scope::Global)
            })
        );
        assert_eq!(Command::ResetConversation.follow_up(), None);
        assert_eq!(chat("hi").follow_up(), None);
    }

    #[test]
    fn test_non_latin_text_after_name_is_kept() {
        let c = classifier();
        assert_eq!(c.classify("maru привет", true), chat("привет"));
        assert_eq!(c.classify("maru, こんにちは", true), chat("こんにちは"));
        assert_eq!(c.classify("maru Élodie says hi", true), chat("Élodie says hi"));
    }

    #[test]
    fn test_possessive_name_is_not_an_address() {
        assert_eq!(
            classifier().classify("maru's favourite food?", true),
            chat("maru's favourite food?")
        );
    }

    #[test]
    fn test_non_latin_tail_is_not_a_command() {
        let c = classifier();
        assert_eq!(c.classify("maru reset ты", true), chat("reset ты"));
        assert_eq!(c.classify("maru model 日本語", true), chat("model 日本語"));
        assert_eq!(c.classify("maru personality get ещё", true), chat("personality get ещё"));
    }

    #[test]
    fn test_bot_name_with_regex_characters() {
        let c = Classifier::new("maru.bot (beta)").unwrap();
        assert_eq!(c.classify("maru.bot (beta) reset", true), Command::ResetConversation);
        assert_eq!(c.classify("marubot reset", true), chat("marubot reset"));
    }
}
