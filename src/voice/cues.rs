//! Spoken cues: voice-mode prompting, silent-reply sentinels, acknowledgment
//! phrases and expression hints for the avatar

use rand::seq::SliceRandom;

use crate::llm::ChatMessage;

/// System instruction prepended to every voice request
pub const VOICE_MODE_INSTRUCTION: &str = "You are speaking out loud through a voice interface. \
Before calling any tool, always say a short phrase first (for example \"Let me check.\") so the \
listener is never left in silence. Keep replies short and conversational. Do not use markdown, \
lists, code blocks or emoji.";

/// Reply values that mean "say nothing"
pub const SILENT_REPLIES: &[&str] = &["NO_REPLY", "HEARTBEAT_OK"];

/// Spoken when every tier of the pipeline has failed
pub const APOLOGY: &str = "Sorry, I couldn't answer that just now. Could you try again?";

/// First sentences longer than this are not used as an acknowledgment
pub const ACK_MAX_CHARS: usize = 60;

/// Prepend the voice-mode instruction to a message list
#[must_use]
pub fn with_voice_mode(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(ChatMessage::system(VOICE_MODE_INSTRUCTION));
    out.extend_from_slice(messages);
    out
}

/// Whether a full reply is a sentinel meaning "nothing to say"
#[must_use]
pub fn is_silent_reply(text: &str) -> bool {
    let trimmed = text.trim();
    SILENT_REPLIES.iter().any(|s| s.eq_ignore_ascii_case(trimmed))
}

/// Whether a partial reply could still turn out to be a sentinel
#[must_use]
pub fn may_become_silent_reply(partial: &str) -> bool {
    let trimmed = partial.trim();
    SILENT_REPLIES.iter().any(|s| {
        s.len() >= trimmed.len()
            && s.get(..trimmed.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(trimmed))
    })
}

/// Writing system of a piece of text, used to pick ack phrases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Japanese,
    Chinese,
    Korean,
}

/// Detect the dominant script; kana wins over Han since Japanese mixes both
#[must_use]
pub fn detect_script(text: &str) -> Script {
    let (mut kana, mut han, mut hangul) = (0usize, 0usize, 0usize);
    for c in text.chars() {
        match c {
            '\u{3040}'..='\u{30ff}' | '\u{31f0}'..='\u{31ff}' => kana += 1,
            '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}' => han += 1,
            '\u{ac00}'..='\u{d7af}' | '\u{1100}'..='\u{11ff}' => hangul += 1,
            _ => {}
        }
    }

    if kana > 0 {
        Script::Japanese
    } else if hangul > han {
        Script::Korean
    } else if han > 0 {
        Script::Chinese
    } else {
        Script::Latin
    }
}

/// Acknowledgment pool for a script
#[must_use]
pub const fn ack_phrases(script: Script) -> &'static [&'static str] {
    match script {
        Script::Latin => &["Hmm, let me check.", "One moment.", "Let me see.", "Okay, give me a second."],
        Script::Japanese => &["ちょっと待ってね。", "えっとね、", "うん、調べてみるね。"],
        Script::Chinese => &["稍等一下。", "我看看。", "好的，我查一下。"],
        Script::Korean => &["잠깐만요.", "확인해 볼게요.", "음, 잠시만요."],
    }
}

/// Where an acknowledgment phrase came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// The model's own first sentence, already short enough to speak
    FirstSentence(String),
    /// A canned phrase in the first sentence's script
    Pooled(&'static str),
}

impl Ack {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::FirstSentence(text) => text.as_str(),
            Self::Pooled(text) => text,
        }
    }
}

/// Choose what to say while a tool call is running
#[must_use]
pub fn choose_ack(first_sentence: &str) -> Ack {
    let trimmed = first_sentence.trim();
    if !trimmed.is_empty()
        && trimmed.chars().count() <= ACK_MAX_CHARS
        && !may_become_silent_reply(trimmed)
    {
        return Ack::FirstSentence(trimmed.to_string());
    }

    let pool = ack_phrases(detect_script(trimmed));
    let phrase = pool
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("One moment.");
    Ack::Pooled(phrase)
}

/// Animation hint derived from spoken text
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpressionHint {
    pub action_id: &'static str,
    pub expression: &'static str,
    pub weight: f32,
}

impl ExpressionHint {
    /// Resting expression used when there is no text yet, and for apologies
    pub const NEUTRAL: Self = Self {
        action_id: "talk",
        expression: "neutral",
        weight: 0.3,
    };
}

const LAUGH_MARKERS: &[&str] = &["haha", "lol", "😂", "笑", "ㅋㅋ", "哈哈"];
const SORRY_MARKERS: &[&str] = &["sorry", "unfortunately", "ごめん", "すみません", "残念", "抱歉", "미안"];
const SURPRISE_MARKERS: &[&str] = &["wow", "really?", "えっ", "本当", "まじ", "哇", "진짜"];

/// Infer a micro-expression for the avatar from reply text
#[must_use]
pub fn expression_for(text: &str) -> ExpressionHint {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return ExpressionHint::NEUTRAL;
    }

    let contains_any = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if contains_any(LAUGH_MARKERS) {
        ExpressionHint {
            action_id: "laugh",
            expression: "happy",
            weight: 0.9,
        }
    } else if contains_any(SORRY_MARKERS) {
        ExpressionHint {
            action_id: "bow",
            expression: "sad",
            weight: 0.6,
        }
    } else if contains_any(SURPRISE_MARKERS) {
        ExpressionHint {
            action_id: "lean_back",
            expression: "surprised",
            weight: 0.7,
        }
    } else if lower.ends_with('?') || lower.ends_with('？') {
        ExpressionHint {
            action_id: "tilt_head",
            expression: "curious",
            weight: 0.5,
        }
    } else if lower.contains('!') || lower.contains('！') {
        ExpressionHint {
            action_id: "nod",
            expression: "happy",
            weight: 0.6,
        }
    } else {
        ExpressionHint::NEUTRAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_match_case_insensitively() {
        assert!(is_silent_reply("NO_REPLY"));
        assert!(is_silent_reply("  no_reply \n"));
        assert!(is_silent_reply("Heartbeat_OK"));
        assert!(!is_silent_reply("NO_REPLY but more"));
        assert!(!is_silent_reply(""));
    }

    #[test]
    fn sentinel_prefixes() {
        assert!(may_become_silent_reply(""));
        assert!(may_become_silent_reply("NO_"));
        assert!(may_become_silent_reply("heart"));
        assert!(may_become_silent_reply("no_reply"));
        assert!(!may_become_silent_reply("No problem"));
        assert!(!may_become_silent_reply("こんにちは"));
    }

    #[test]
    fn voice_mode_is_prepended() {
        let messages = with_voice_mode(&[ChatMessage::user("hi")]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, VOICE_MODE_INSTRUCTION);
        assert_eq!(messages[1], ChatMessage::user("hi"));
    }

    #[test]
    fn script_detection() {
        assert_eq!(detect_script("Let me look"), Script::Latin);
        assert_eq!(detect_script("天気を調べるね"), Script::Japanese);
        assert_eq!(detect_script("我查一下天气"), Script::Chinese);
        assert_eq!(detect_script("날씨를 확인할게요"), Script::Korean);
    }

    #[test]
    fn short_first_sentence_is_its_own_ack() {
        assert_eq!(
            choose_ack("Let me check the weather."),
            Ack::FirstSentence("Let me check the weather.".to_string())
        );
    }

    #[test]
    fn long_first_sentence_uses_pool_in_same_script() {
        let long = "今日はとても良い天気なので、散歩に行くのもいいかもしれないし、公園でのんびりするのもいいよね、どう思う？どうかな？私はどっちでもいいよ。";
        let ack = choose_ack(long);
        assert!(matches!(ack, Ack::Pooled(_)));
        assert!(ack_phrases(Script::Japanese).contains(&ack.text()));
    }

    #[test]
    fn expressions_follow_text() {
        assert_eq!(expression_for("haha that's funny").expression, "happy");
        assert_eq!(expression_for("Sorry about that.").expression, "sad");
        assert_eq!(expression_for("Do you want tea?").expression, "curious");
        assert_eq!(expression_for("Great!").action_id, "nod");
        assert_eq!(expression_for("Okay."), ExpressionHint::NEUTRAL);
        assert_eq!(expression_for(""), ExpressionHint::NEUTRAL);
    }
}
