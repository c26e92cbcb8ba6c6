use crate::model::Severity;
use std::time::{Duration, SystemTime};
use teloxide::utils::html;

const UNITS: [&str; 5] = ["Bytes", "KiB", "MiB", "GiB", "TiB"];

pub fn format_bytes(bytes: u64) -> String {
    format_bytes_with_precision(bytes, 2)
}

pub fn format_bytes_with_precision(bytes: u64, decimals: usize) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let fixed = format!("{value:.decimals$}");
    let trimmed = if fixed.contains('.') {
        fixed.trim_end_matches('0').trim_end_matches('.')
    } else {
        fixed.as_str()
    };
    format!("{trimmed} {}", UNITS[unit])
}

pub fn format_millis(elapsed: Duration) -> String {
    format!("{}ms", elapsed.as_millis())
}

pub fn code(text: &str) -> String {
    format!("<code>{}</code>", html::escape(text))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accent {
    Green,
    Amber,
    Red,
    Blue,
}

impl Accent {
    fn marker(self) -> &'static str {
        match self {
            Self::Green => "🟢",
            Self::Amber => "🟡",
            Self::Red => "🔴",
            Self::Blue => "🔵",
        }
    }
}

impl From<Severity> for Accent {
    fn from(value: Severity) -> Self {
        match value {
            Severity::Green => Self::Green,
            Severity::Amber => Self::Amber,
            Severity::Red => Self::Red,
        }
    }
}

// field values and the description are HTML fragments; title and field names are escaped
#[derive(Debug, Clone)]
pub struct Embed {
    title: String,
    accent: Accent,
    description: Option<String>,
    fields: Vec<(String, String)>,
    footer: Option<String>,
}

impl Embed {
    pub fn new(title: impl Into<String>, accent: Accent) -> Self {
        Self {
            title: title.into(),
            accent,
            description: None,
            fields: Vec::new(),
            footer: None,
        }
    }

    pub fn description(mut self, html: impl Into<String>) -> Self {
        self.description = Some(html.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value_html: impl Into<String>) -> Self {
        self.fields.push((name.into(), value_html.into()));
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(text.into());
        self
    }

    pub fn timestamped(self, label: &str) -> Self {
        let now = humantime::format_rfc3339_seconds(SystemTime::now());
        self.footer(format!("{label} {now}"))
    }

    pub fn accent(&self) -> Accent {
        self.accent
    }

    pub fn to_html(&self) -> String {
        let mut out = format!(
            "{} <b>{}</b>",
            self.accent.marker(),
            html::escape(&self.title)
        );
        if let Some(description) = &self.description {
            out.push('\n');
            out.push_str(description);
        }
        if !self.fields.is_empty() {
            out.push('\n');
            for (name, value) in &self.fields {
                out.push('\n');
                if name.is_empty() {
                    out.push_str(value);
                } else {
                    out.push_str(&format!("<b>{}:</b> {value}", html::escape(name)));
                }
            }
        }
        if let Some(footer) = &self.footer {
            out.push_str(&format!("\n\n<i>{}</i>", html::escape(footer)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
    }

    #[test]
    fn picks_largest_unit_and_trims_zeros() {
        assert_eq!(format_bytes(1024), "1 KiB");
        assert_eq!(format_bytes_with_precision(1536, 1), "1.5 KiB");
        assert_eq!(format_bytes(1000), "1000 Bytes");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5 GiB");
        assert_eq!(format_bytes(1_234_567), "1.18 MiB");
        assert_eq!(format_bytes_with_precision(1_234_567, 0), "1 MiB");
    }

    #[test]
    fn caps_at_tebibytes() {
        let two_pib = 2 * 1024_u64.pow(5);
        assert_eq!(format_bytes(two_pib), "2048 TiB");
    }

    #[test]
    fn embed_escapes_title_names_and_footer() {
        let text = Embed::new("a <b> title", Accent::Red)
            .description(format!("failed: {}", code("<oops>")))
            .field("x & y", "<code>1</code>")
            .field("", "plain note")
            .footer("at <now>")
            .to_html();

        assert!(text.starts_with("🔴 <b>a &lt;b&gt; title</b>"));
        assert!(text.contains("failed: <code>&lt;oops&gt;</code>"));
        assert!(text.contains("<b>x &amp; y:</b> <code>1</code>"));
        assert!(text.contains("\nplain note"));
        assert!(text.ends_with("<i>at &lt;now&gt;</i>"));
    }

    #[test]
    fn severity_maps_to_accent() {
        assert_eq!(Accent::from(Severity::Amber), Accent::Amber);
        assert_eq!(Embed::new("t", Severity::Green.into()).accent(), Accent::Green);
    }
}
