use chrono::Local;

use crate::setup::{StepDefinition, StepStatus, View};

/// Seconds between automatic reloads of the progress page
const REFRESH_SECS: u32 = 5;

/// Static context shared by every page
#[derive(Debug, Clone)]
pub struct PageContext {
    pub title: String,
    pub hostname: String,
}

impl PageContext {
    pub fn new(title: impl Into<String>) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            title: title.into(),
            hostname,
        }
    }

    pub fn render(&self, view: &View) -> String {
        let body = match view {
            View::CollectInput { step } => self.input_form(step),
            View::Confirm { step } => self.confirm_form(step),
            View::Progress { step, status, logs } => self.progress(step, *status, logs),
            View::Complete => complete(),
        };
        self.layout(&body)
    }

    pub fn error(&self, message: &str) -> String {
        self.layout(&format!(
            "<h2>Something went wrong</h2>\n<pre>{}</pre>\n",
            escape(message)
        ))
    }

    fn layout(&self, body: &str) -> String {
        let host = if self.hostname.is_empty() {
            String::new()
        } else {
            format!(" on {}", escape(&self.hostname))
        };
        format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n<h1>{title}{host}</h1>\n{body}</body>\n</html>\n",
            title = escape(&self.title),
        )
    }

    fn input_form(&self, step: &StepDefinition) -> String {
        let mut html = format!(
            "<h2>{}</h2>\n<form method=\"POST\">\n  <input type=\"hidden\" name=\"step\" value=\"{}\">\n",
            escape(&self.title),
            escape(&step.id)
        );
        for field in step.form_fields() {
            let kind = if field.secret { "password" } else { "text" };
            html.push_str(&format!(
                "  {}: <input name=\"{}\" type=\"{}\" required><br>\n",
                escape(&field.label),
                escape(&field.name),
                kind
            ));
        }
        html.push_str(&format!(
            "  <button type=\"submit\">Run: {}</button>\n</form>\n",
            escape(&step.title)
        ));
        html
    }

    fn confirm_form(&self, step: &StepDefinition) -> String {
        format!(
            "<h2>{title}: {label}</h2>\n<form method=\"POST\">\n  <input type=\"hidden\" name=\"step\" value=\"{id}\">\n  <button type=\"submit\">Request {label}</button>\n</form>\n",
            title = escape(&self.title),
            label = escape(&step.title),
            id = escape(&step.id)
        )
    }

    fn progress(&self, step: &StepDefinition, status: StepStatus, logs: &str) -> String {
        let mut html = format!(
            "<h2>{}</h2>\n<pre>{}</pre>\n<pre>Current status: {}</pre>\n<p>Last refreshed {}</p>\n",
            escape(&step.title),
            escape(logs),
            status,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        // A failed step stays on screen for the operator; nothing will change it
        if status != StepStatus::Failed {
            html.push_str(&format!(
                "<script>\n  setTimeout(function() {{ window.location.reload(); }}, {});\n</script>\n",
                REFRESH_SECS * 1000
            ));
        }
        html
    }
}

fn complete() -> String {
    "<h2>Setup Complete</h2>\n<p>All provisioning steps finished. The platform is ready to use.</p>\n"
        .to_string()
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::CommandSpec;

    fn ctx() -> PageContext {
        PageContext {
            title: "Setup".to_string(),
            hostname: String::new(),
        }
    }

    #[test]
    fn progress_escapes_logs() {
        let step = StepDefinition::new("init_cert", "Certs", CommandSpec::new("make", &[]));
        let html = ctx().render(&View::Progress {
            step,
            status: StepStatus::InProgress,
            logs: "<script>alert(1)</script>".to_string(),
        });
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(html.contains("Current status: in_progress"));
        assert!(html.contains("window.location.reload"));
    }

    #[test]
    fn failed_progress_does_not_refresh() {
        let step = StepDefinition::new("init_cert", "Certs", CommandSpec::new("make", &[]));
        let html = ctx().render(&View::Progress {
            step,
            status: StepStatus::Failed,
            logs: String::new(),
        });
        assert!(html.contains("Current status: failed"));
        assert!(!html.contains("window.location.reload"));
    }
}
