//! WeChat-style webhook envelope.
//!
//! Inbound messages are flat XML documents under an `<xml>` root:
//!
//! ```xml
//! <xml>
//!   <ToUserName><![CDATA[bot]]></ToUserName>
//!   <FromUserName><![CDATA[alice]]></FromUserName>
//!   <CreateTime>1700000000</CreateTime>
//!   <MsgType><![CDATA[text]]></MsgType>
//!   <Content><![CDATA[@bot what is the refund policy?]]></Content>
//! </xml>
//! ```
//!
//! A reply swaps the two user names and carries a text body. The URL
//! verification handshake signs `sort([token, timestamp, nonce]).join("")`
//! with SHA-1.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Reply to messages that are not questions addressed to the bot.
pub const GREETING: &str =
    "Hello! I am the knowledge-base bot. Mention me and ask your question.";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed xml: {0}")]
    Xml(String),

    #[error("missing element <{0}>")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub to_user: String,
    pub from_user: String,
    pub msg_type: String,
    pub content: Option<String>,
}

impl IncomingMessage {
    /// The question addressed to the bot, with every mention marker removed.
    ///
    /// `None` for non-text messages, messages without a marker, and messages
    /// that are empty once the markers are gone.
    pub fn question(&self, markers: &[String]) -> Option<String> {
        if self.msg_type != "text" {
            return None;
        }
        let content = self.content.as_deref()?;
        if !markers.iter().any(|m| content.contains(m.as_str())) {
            return None;
        }

        let mut question = content.to_string();
        for marker in markers {
            question = question.replace(marker.as_str(), "");
        }
        let question = question.trim();
        (!question.is_empty()).then(|| question.to_string())
    }
}

/// Parse the inbound envelope. Element text and CDATA are both accepted.
pub fn parse_message(xml: &str) -> Result<IncomingMessage, EnvelopeError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields: HashMap<String, String> = HashMap::new();
    let mut current: Option<String> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "xml" {
                    saw_root = true;
                } else {
                    current = Some(name);
                }
            }
            Ok(Event::Text(te)) => {
                if let Some(name) = &current {
                    let text = te
                        .unescape()
                        .map_err(|e| EnvelopeError::Xml(e.to_string()))?;
                    fields.entry(name.clone()).or_default().push_str(&text);
                }
            }
            Ok(Event::CData(cd)) => {
                if let Some(name) = &current {
                    let bytes = cd.into_inner();
                    fields
                        .entry(name.clone())
                        .or_default()
                        .push_str(&String::from_utf8_lossy(&bytes));
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(EnvelopeError::Xml(e.to_string())),
            _ => {}
        }
    }

    if !saw_root {
        return Err(EnvelopeError::Missing("xml"));
    }
    let mut take = |key: &'static str| fields.remove(key).ok_or(EnvelopeError::Missing(key));

    Ok(IncomingMessage {
        to_user: take("ToUserName")?,
        from_user: take("FromUserName")?,
        msg_type: take("MsgType")?,
        content: take("Content").ok(),
    })
}

fn cdata(text: &str) -> String {
    // A literal "]]>" must be split across two sections.
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}

/// Text reply to `msg`, addressed back to its sender.
pub fn build_reply(msg: &IncomingMessage, content: &str, create_time: i64) -> String {
    format!(
        "<xml><ToUserName>{}</ToUserName><FromUserName>{}</FromUserName>\
<CreateTime>{}</CreateTime><MsgType>{}</MsgType><Content>{}</Content></xml>",
        cdata(&msg.from_user),
        cdata(&msg.to_user),
        create_time,
        cdata("text"),
        cdata(content)
    )
}

/// Signature the platform sends for a verification request.
pub fn sign(token: &str, timestamp: &str, nonce: &str) -> String {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();
    let mut hasher = Sha1::new();
    hasher.update(parts.concat().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_signature(token: &str, signature: &str, timestamp: &str, nonce: &str) -> bool {
    sign(token, timestamp, nonce).eq_ignore_ascii_case(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT_MESSAGE: &str = "<xml>\
<ToUserName><![CDATA[bot]]></ToUserName>\
<FromUserName><![CDATA[alice]]></FromUserName>\
<CreateTime>1700000000</CreateTime>\
<MsgType><![CDATA[text]]></MsgType>\
<Content><![CDATA[@bot what is the refund policy?]]></Content>\
<MsgId>1234567890</MsgId>\
</xml>";

    fn markers() -> Vec<String> {
        vec!["@机器人".to_string(), "@bot".to_string()]
    }

    #[test]
    fn test_parse_cdata_envelope() {
        let msg = parse_message(TEXT_MESSAGE).unwrap();
        assert_eq!(msg.to_user, "bot");
        assert_eq!(msg.from_user, "alice");
        assert_eq!(msg.msg_type, "text");
        assert_eq!(msg.content.as_deref(), Some("@bot what is the refund policy?"));
    }

    #[test]
    fn test_parse_plain_text_elements() {
        let xml = "<xml><ToUserName>bot</ToUserName><FromUserName>bob</FromUserName>\
<MsgType>event</MsgType></xml>";
        let msg = parse_message(xml).unwrap();
        assert_eq!(msg.msg_type, "event");
        assert_eq!(msg.content, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_message("not xml at all").is_err());
        assert!(parse_message("<xml><ToUserName>x</ToUserName></xml>").is_err());
    }

    #[test]
    fn test_question_strips_all_markers() {
        let msg = IncomingMessage {
            to_user: "bot".to_string(),
            from_user: "u".to_string(),
            msg_type: "text".to_string(),
            content: Some("@机器人 退款政策是什么？ @bot".to_string()),
        };
        assert_eq!(msg.question(&markers()).as_deref(), Some("退款政策是什么？"));
    }

    #[test]
    fn test_question_requires_marker_and_text() {
        let mut msg = parse_message(TEXT_MESSAGE).unwrap();
        msg.content = Some("no mention here".to_string());
        assert_eq!(msg.question(&markers()), None);

        msg.content = Some("  @bot  ".to_string());
        assert_eq!(msg.question(&markers()), None);

        msg.content = Some("@bot hi".to_string());
        msg.msg_type = "image".to_string();
        assert_eq!(msg.question(&markers()), None);
    }

    #[test]
    fn test_reply_swaps_users() {
        let msg = parse_message(TEXT_MESSAGE).unwrap();
        let reply = build_reply(&msg, "answer", 42);
        let parsed = parse_message(&reply).unwrap();
        assert_eq!(parsed.to_user, "alice");
        assert_eq!(parsed.from_user, "bot");
        assert_eq!(parsed.content.as_deref(), Some("answer"));
        assert!(reply.contains("<CreateTime>42</CreateTime>"));
    }

    #[test]
    fn test_reply_escapes_cdata_terminator() {
        let msg = parse_message(TEXT_MESSAGE).unwrap();
        let reply = build_reply(&msg, "a ]]> b", 1);
        let parsed = parse_message(&reply).unwrap();
        assert_eq!(parsed.content.as_deref(), Some("a ]]> b"));
    }

    #[test]
    fn test_signature_is_order_independent_sha1() {
        // sha1("123abctoken"), the sorted concatenation.
        let expected = {
            let mut h = Sha1::new();
            h.update(b"123abctoken");
            hex::encode(h.finalize())
        };
        assert_eq!(sign("token", "123", "abc"), expected);
        assert!(verify_signature("token", &expected, "123", "abc"));
        assert!(!verify_signature("other", &expected, "123", "abc"));
    }
}
