//! ABOUTME: Parsing of per-camera analysis switch commands received over MQTT
//! ABOUTME: Accepts ON/OFF, true/false and 1/0 on `{prefix}/{camera}/analysis/set`

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCommand {
    pub camera: String,
    pub enabled: bool,
}

fn parse_flag(payload: &[u8]) -> Option<bool> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    if ["on", "true", "1"].iter().any(|v| text.eq_ignore_ascii_case(v)) {
        Some(true)
    } else if ["off", "false", "0"].iter().any(|v| text.eq_ignore_ascii_case(v)) {
        Some(false)
    } else {
        None
    }
}

/// `None` when the topic is not a switch command or the payload is not a recognized flag
pub fn parse_switch_command(prefix: &str, topic: &str, payload: &[u8]) -> Option<SwitchCommand> {
    let rest = topic
        .strip_prefix(prefix.trim_end_matches('/'))?
        .strip_prefix('/')?;
    let camera = rest.strip_suffix("/analysis/set")?;
    if camera.is_empty() || camera.contains('/') {
        return None;
    }

    Some(SwitchCommand {
        camera: camera.to_string(),
        enabled: parse_flag(payload)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_on_and_off() {
        assert_eq!(
            parse_switch_command("frigem", "frigem/front_door/analysis/set", b"OFF"),
            Some(SwitchCommand {
                camera: "front_door".to_string(),
                enabled: false
            })
        );
        assert_eq!(
            parse_switch_command("frigem/", "frigem/garage/analysis/set", b" on\n"),
            Some(SwitchCommand {
                camera: "garage".to_string(),
                enabled: true
            })
        );
    }

    #[test]
    fn test_alternate_flags() {
        let topic = "frigem/garage/analysis/set";
        assert_eq!(parse_switch_command("frigem", topic, b"true").map(|c| c.enabled), Some(true));
        assert_eq!(parse_switch_command("frigem", topic, b"1").map(|c| c.enabled), Some(true));
        assert_eq!(parse_switch_command("frigem", topic, b"False").map(|c| c.enabled), Some(false));
        assert_eq!(parse_switch_command("frigem", topic, b"0").map(|c| c.enabled), Some(false));
    }

    #[test]
    fn test_rejects_other_topics_and_payloads() {
        assert!(parse_switch_command("frigem", "frigate/events", b"ON").is_none());
        assert!(parse_switch_command("frigem", "frigem/garage/analysis", b"ON").is_none());
        assert!(parse_switch_command("frigem", "frigem//analysis/set", b"ON").is_none());
        assert!(parse_switch_command("frigem", "frigem/a/b/analysis/set", b"ON").is_none());
        assert!(parse_switch_command("frigem", "frigemx/garage/analysis/set", b"ON").is_none());
        assert!(parse_switch_command("frigem", "frigem/garage/analysis/set", b"maybe").is_none());
        assert!(parse_switch_command("frigem", "frigem/garage/analysis/set", &[0xff]).is_none());
    }
}
