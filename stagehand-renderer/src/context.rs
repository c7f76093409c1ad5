//! Template context: serializable rendering payload built from [`AppConfig`].

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use stagehand_core::types::AppConfig;
use stagehand_transport::shell_quote;

/// One `process.env` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
    /// `KEY=value` quoted for a systemd `Environment=` line.
    pub systemd: String,
}

/// Everything the supervisor templates can reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorContext {
    pub app: String,
    pub unit: String,
    /// Directory the process runs in.
    pub working_dir: String,
    /// `process.command`, shell-quoted and joined.
    pub command_line: String,
    /// `ExecStart=` value: `/bin/sh -c "exec <command_line>"`, systemd-quoted.
    pub exec_start: String,
    pub env: Vec<EnvVar>,
    pub log_path: String,
    pub log_dir: String,
    pub pid_path: String,
    pub pid_dir: String,
    pub stop_timeout_secs: u64,
    pub user_mode: bool,
    pub generated_at: String,
}

impl SupervisorContext {
    pub fn new(config: &AppConfig, working_dir: &Path, log_path: &Path, pid_path: &Path) -> Self {
        let command_line = config
            .process
            .command
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ");
        let parent = |p: &Path| {
            p.parent()
                .map(|d| d.to_string_lossy().into_owned())
                .unwrap_or_else(|| ".".to_string())
        };

        Self {
            app: config.name.0.clone(),
            unit: config.systemd_unit(),
            working_dir: working_dir.to_string_lossy().into_owned(),
            exec_start: format!("/bin/sh -c {}", systemd_quote(&format!("exec {command_line}"))),
            command_line,
            env: config
                .process
                .env
                .iter()
                .map(|(key, value)| EnvVar {
                    key: key.clone(),
                    value: value.clone(),
                    systemd: systemd_quote(&format!("{key}={value}")),
                })
                .collect(),
            log_path: log_path.to_string_lossy().into_owned(),
            log_dir: parent(log_path),
            pid_path: pid_path.to_string_lossy().into_owned(),
            pid_dir: parent(pid_path),
            stop_timeout_secs: config.process.stop_timeout_secs,
            user_mode: config.process.systemd.user_mode,
            generated_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn to_tera_context(&self) -> tera::Result<tera::Context> {
        tera::Context::from_serialize(self)
    }
}

/// Double-quote `s` for a systemd unit file line.
///
/// `%` and `$` are doubled so systemd performs neither specifier nor variable
/// expansion on the value.
pub fn systemd_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '%' => out.push_str("%%"),
            '$' => out.push_str("$$"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::types::{AppName, TargetConfig};
    use std::path::PathBuf;

    #[test]
    fn systemd_quote_escapes_specials() {
        assert_eq!(systemd_quote("plain"), "\"plain\"");
        assert_eq!(systemd_quote("a \"b\" 100% $HOME"), r#""a \"b\" 100%% $$HOME""#);
    }

    #[test]
    fn context_quotes_command() {
        let mut cfg = AppConfig::new(
            AppName::from("web"),
            PathBuf::from("/src/web"),
            TargetConfig::local(PathBuf::from("/srv/web")),
        );
        cfg.process.command = vec!["python3".into(), "-c".into(), "print('hi')".into()];
        let ctx = SupervisorContext::new(
            &cfg,
            Path::new("/srv/web/current"),
            Path::new("/srv/web/logs/web.log"),
            Path::new("/srv/web/run/web.pid"),
        );
        assert_eq!(ctx.command_line, r#"python3 -c 'print('\''hi'\'')'"#);
        assert_eq!(ctx.log_dir, "/srv/web/logs");
        assert_eq!(ctx.unit, "stagehand-web");
    }
}
