//! Date/time watermark description
//!
//! The weekday is resolved once, when the description is built, while the
//! date and clock are left to the overlay's per-frame `%{localtime}`
//! expansion. A session running past midnight therefore keeps showing the
//! weekday it was opened on.

use chrono::{Datelike, Local, Weekday};
use serde::{Deserialize, Serialize};

use super::parse::quote;
use crate::OverlayConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    pub fn weekday_name(self, weekday: Weekday) -> &'static str {
        match self {
            Locale::En => match weekday {
                Weekday::Mon => "Mon",
                Weekday::Tue => "Tue",
                Weekday::Wed => "Wed",
                Weekday::Thu => "Thu",
                Weekday::Fri => "Fri",
                Weekday::Sat => "Sat",
                Weekday::Sun => "Sun",
            },
            Locale::Zh => match weekday {
                Weekday::Mon => "星期一",
                Weekday::Tue => "星期二",
                Weekday::Wed => "星期三",
                Weekday::Thu => "星期四",
                Weekday::Fri => "星期五",
                Weekday::Sat => "星期六",
                Weekday::Sun => "星期日",
            },
        }
    }
}

/// Overlay description for `weekday`
pub fn describe(overlay: &OverlayConfig, weekday: Weekday) -> String {
    let mut text = format!(
        "%{{localtime:%Y-%m-%d}} {} %{{localtime:%H:%M:%S}}",
        overlay.locale.weekday_name(weekday)
    );
    if !overlay.label.is_empty() {
        text.push(' ');
        text.push_str(&overlay.label);
    }

    let mut desc = String::from("drawtext=");
    if let Some(fontfile) = &overlay.fontfile {
        desc.push_str("fontfile=");
        desc.push_str(&quote(fontfile));
        desc.push(':');
    }
    desc.push_str(&format!(
        "x={}:y={}:fontcolor={}:fontsize={}:shadowcolor={}:shadowx={}:shadowy={}:text={}",
        overlay.x,
        overlay.y,
        quote(&overlay.fontcolor),
        overlay.fontsize,
        quote(&overlay.shadowcolor),
        overlay.shadowx,
        overlay.shadowy,
        quote(&text)
    ));
    desc
}

/// Description for the session starting now. An explicit override wins.
pub fn session_description(overlay: &OverlayConfig) -> String {
    match &overlay.description {
        Some(description) => description.clone(),
        None => describe(overlay, Local::now().weekday()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse::parse_chain;

    #[test]
    fn generated_description_parses_back() {
        let overlay = OverlayConfig::default();
        let desc = describe(&overlay, Weekday::Wed);
        let chain = parse_chain(&desc).unwrap();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name, "drawtext");
        let text = chain[0]
            .options
            .iter()
            .find(|o| o.key.as_deref() == Some("text"))
            .unwrap();
        assert_eq!(
            text.value,
            "%{localtime:%Y-%m-%d} Wed %{localtime:%H:%M:%S} IPC"
        );
    }

    #[test]
    fn chinese_weekdays_and_fontfile() {
        let overlay = OverlayConfig {
            locale: Locale::Zh,
            fontfile: Some("/usr/share/fonts/wqy: microhei.ttc".into()),
            label: "it's".into(),
            ..OverlayConfig::default()
        };
        let desc = describe(&overlay, Weekday::Sun);
        assert!(desc.contains("星期日"));

        let chain = parse_chain(&desc).unwrap();
        assert_eq!(chain[0].options[0].value, "/usr/share/fonts/wqy: microhei.ttc");
        assert!(chain[0].options.last().unwrap().value.ends_with("it's"));
    }

    #[test]
    fn override_is_used_verbatim() {
        let overlay = OverlayConfig {
            description: Some("null".into()),
            ..OverlayConfig::default()
        };
        assert_eq!(session_description(&overlay), "null");
    }
}
