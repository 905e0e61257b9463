//! Turn-ending classification.
//!
//! A stop event does not say whether the agent finished or asked something in
//! prose. The classifier reads the agent's last message and answers `idle` or
//! `waiting_input`. The default implementation runs an external command (an
//! LLM CLI) with a hard deadline; callers treat every error as `idle`.
//!
//! Each agent gets its own backend: a configured override, else the agent
//! driver's own CLI, else the configured default command.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use attn_core::driver_for;
use attn_daemon_protocol::{AgentKind, SessionState};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ClassifierConfig, PROMPT_PLACEHOLDER};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const OUTPUT_GRACE: Duration = Duration::from_millis(200);
const MAX_SNIPPET_CHARS: usize = 120;
const AGENT_KINDS: [AgentKind; 3] = [AgentKind::Claude, AgentKind::Codex, AgentKind::Other];

static VERDICT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:VERDICT\s*[:=]\s*)?(WAITING_INPUT|WAITING|DONE|IDLE)(?:\s*(?:[-:]\s+.*|\([^)]*\)|[.!?]))?\s*$",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Idle,
    WaitingInput,
}

impl Verdict {
    pub fn state(self) -> SessionState {
        match self {
            Verdict::Idle => SessionState::Idle,
            Verdict::WaitingInput => SessionState::WaitingInput,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier is disabled")]
    Disabled,

    #[error("failed to start classifier: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("classifier I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("classifier exited with {0}")]
    Failed(ExitStatus),

    #[error("classifier returned an empty response")]
    EmptyResponse,

    #[error("no verdict in classifier output: {0}")]
    NoVerdict(String),
}

pub trait Classifier: Send + Sync {
    /// Classifies `text`, returning within roughly `timeout`.
    fn classify(&self, text: &str, timeout: Duration) -> Result<Verdict, ClassifierError>;
}

/// Classifier backends by agent, with a fallback for agents that have none.
pub struct ClassifierSet {
    default: Arc<dyn Classifier>,
    agents: HashMap<AgentKind, Arc<dyn Classifier>>,
}

impl ClassifierSet {
    pub fn new(default: Arc<dyn Classifier>) -> Self {
        Self {
            default,
            agents: HashMap::new(),
        }
    }

    pub fn with_agent(mut self, kind: AgentKind, classifier: Arc<dyn Classifier>) -> Self {
        self.agents.insert(kind, classifier);
        self
    }

    pub fn for_agent(&self, kind: AgentKind) -> &dyn Classifier {
        &**self.agents.get(&kind).unwrap_or(&self.default)
    }
}

pub fn from_config(config: &ClassifierConfig) -> ClassifierSet {
    if !config.enabled {
        return ClassifierSet::new(Arc::new(DisabledClassifier));
    }

    for name in config.agents.keys() {
        if !AGENT_KINDS.iter().any(|kind| kind.as_str() == name.as_str()) {
            warn!(agent = %name, "Ignoring classifier override for unknown agent");
        }
    }

    let mut set = ClassifierSet::new(command_or_disabled(&config.program, &config.args));
    for kind in AGENT_KINDS {
        let backend = if let Some(command) = config.agents.get(kind.as_str()) {
            command_or_disabled(&command.program, &command.args)
        } else if let Some(provider) = driver_for(kind).classifier() {
            let command = provider.classifier_command();
            let args: Vec<String> = command.args.iter().map(|arg| arg.to_string()).collect();
            command_or_disabled(command.program, &args)
        } else {
            continue;
        };
        set = set.with_agent(kind, backend);
    }
    set
}

fn command_or_disabled(program: &str, args: &[String]) -> Arc<dyn Classifier> {
    if program.trim().is_empty() {
        Arc::new(DisabledClassifier)
    } else {
        Arc::new(CommandClassifier::new(program.to_string(), args.to_vec()))
    }
}

pub struct DisabledClassifier;

impl Classifier for DisabledClassifier {
    fn classify(&self, _text: &str, _timeout: Duration) -> Result<Verdict, ClassifierError> {
        Err(ClassifierError::Disabled)
    }
}

/// Runs `program args..` per classification. An argument equal to `{prompt}`
/// is replaced by the prompt; otherwise the prompt is written to stdin.
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
}

impl CommandClassifier {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    fn spawn(&self, prompt: &str) -> Result<(Child, bool), ClassifierError> {
        let mut prompt_in_args = false;
        let args: Vec<&str> = self
            .args
            .iter()
            .map(|arg| {
                if arg == PROMPT_PLACEHOLDER {
                    prompt_in_args = true;
                    prompt
                } else {
                    arg.as_str()
                }
            })
            .collect();

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(if prompt_in_args {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(ClassifierError::Spawn)?;
        Ok((child, prompt_in_args))
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, text: &str, timeout: Duration) -> Result<Verdict, ClassifierError> {
        let deadline = Instant::now() + timeout;
        let prompt = build_prompt(text);
        let (mut child, prompt_in_args) = self.spawn(&prompt)?;

        if !prompt_in_args {
            if let Some(mut stdin) = child.stdin.take() {
                // A child that never reads its stdin must not hold us past the deadline.
                thread::spawn(move || {
                    let _ = stdin.write_all(prompt.as_bytes());
                });
            }
        }

        let (output_tx, output_rx) = mpsc::channel();
        if let Some(mut stdout) = child.stdout.take() {
            thread::spawn(move || {
                let mut output = String::new();
                let result = stdout.read_to_string(&mut output).map(|_| output);
                let _ = output_tx.send(result);
            });
        }

        let status = wait_until(&mut child, deadline, timeout)?;
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(OUTPUT_GRACE);
        let output = match output_rx.recv_timeout(remaining) {
            Ok(result) => result?,
            Err(_) => return Err(ClassifierError::Timeout(timeout)),
        };

        if !status.success() {
            return Err(ClassifierError::Failed(status));
        }
        debug!(output = %snippet(&output), "Classifier responded");
        parse_verdict(&output)
    }
}

fn wait_until(
    child: &mut Child,
    deadline: Instant,
    timeout: Duration,
) -> Result<ExitStatus, ClassifierError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ClassifierError::Timeout(timeout));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ClassifierError::Io(err));
            }
        }
    }
}

pub fn build_prompt(text: &str) -> String {
    format!(
        r#"Decide whether this assistant message is waiting for the user.

Reply with JSON only, exactly one of:
{{"verdict":"WAITING"}}
{{"verdict":"DONE"}}

WAITING when the message asks the user a question or asks for confirmation,
a choice, clarification or direction. DONE when the message is complete and
asks nothing of the user.

Message:
"""
{}
"""
"#,
        text
    )
}

/// Extracts a verdict from classifier output: a JSON object (possibly wrapped
/// in other text) or a bare `WAITING`/`DONE` line.
pub fn parse_verdict(output: &str) -> Result<Verdict, ClassifierError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(ClassifierError::EmptyResponse);
    }

    if let Some(verdict) = verdict_from_json(trimmed) {
        return Ok(verdict);
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(verdict_from_token)
        .ok_or_else(|| ClassifierError::NoVerdict(snippet(trimmed)))
}

fn verdict_from_json(text: &str) -> Option<Verdict> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return verdict_from_value(&value);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .and_then(|value| verdict_from_value(&value))
}

fn verdict_from_value(value: &Value) -> Option<Verdict> {
    match value {
        Value::String(token) => verdict_from_token(token),
        Value::Object(map) => ["verdict", "state", "status", "classification"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(verdict_from_value)
            .or_else(|| match map.get("needs_input") {
                Some(Value::Bool(true)) => Some(Verdict::WaitingInput),
                Some(Value::Bool(false)) => Some(Verdict::Idle),
                _ => None,
            }),
        _ => None,
    }
}

fn verdict_from_token(token: &str) -> Option<Verdict> {
    let captures = VERDICT_LINE.captures(token.trim())?;
    match captures.get(1)?.as_str().to_ascii_uppercase().as_str() {
        "WAITING" | "WAITING_INPUT" => Some(Verdict::WaitingInput),
        "DONE" | "IDLE" => Some(Verdict::Idle),
        _ => None,
    }
}

fn snippet(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(MAX_SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassifierCommandConfig;

    #[test]
    fn parses_json_verdicts() {
        assert_eq!(
            parse_verdict(r#"{"verdict":"WAITING"}"#).unwrap(),
            Verdict::WaitingInput
        );
        assert_eq!(parse_verdict(r#"{"verdict":"DONE"}"#).unwrap(), Verdict::Idle);
        assert_eq!(
            parse_verdict(r#"{"status":"waiting_input"}"#).unwrap(),
            Verdict::WaitingInput
        );
        assert_eq!(
            parse_verdict(r#"{"needs_input":false}"#).unwrap(),
            Verdict::Idle
        );
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let output = "Sure, here is my answer:\n```json\n{\"verdict\": \"WAITING\"}\n```";
        assert_eq!(parse_verdict(output).unwrap(), Verdict::WaitingInput);
    }

    #[test]
    fn parses_bare_verdict_lines() {
        assert_eq!(parse_verdict("WAITING").unwrap(), Verdict::WaitingInput);
        assert_eq!(parse_verdict("done.").unwrap(), Verdict::Idle);
        assert_eq!(
            parse_verdict("VERDICT: waiting - asks which branch").unwrap(),
            Verdict::WaitingInput
        );
        assert_eq!(parse_verdict("\n\nIDLE (nothing asked)\n").unwrap(), Verdict::Idle);
    }

    #[test]
    fn rejects_output_without_verdict() {
        assert!(matches!(
            parse_verdict("   "),
            Err(ClassifierError::EmptyResponse)
        ));
        assert!(matches!(
            parse_verdict("I think the user is done waiting"),
            Err(ClassifierError::NoVerdict(_))
        ));
    }

    #[test]
    fn prompt_embeds_text() {
        let prompt = build_prompt("Should I deploy?");
        assert!(prompt.contains("Should I deploy?"));
        assert!(prompt.contains(r#"{"verdict":"WAITING"}"#));
    }

    fn echo_command(answer: &str) -> ClassifierCommandConfig {
        ClassifierCommandConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), format!("cat >/dev/null; echo {}", answer)],
        }
    }

    #[test]
    fn disabled_classifier_always_fails() {
        let mut config = ClassifierConfig {
            enabled: false,
            ..ClassifierConfig::default()
        };
        config
            .agents
            .insert("codex".to_string(), echo_command("WAITING"));
        let classifiers = from_config(&config);
        for kind in AGENT_KINDS {
            assert!(matches!(
                classifiers.for_agent(kind).classify("anything?", Duration::from_secs(1)),
                Err(ClassifierError::Disabled)
            ));
        }
    }

    #[test]
    fn per_agent_override_beats_the_default_command() {
        let default = echo_command("DONE");
        let mut config = ClassifierConfig {
            program: default.program,
            args: default.args,
            ..ClassifierConfig::default()
        };
        config
            .agents
            .insert("codex".to_string(), echo_command("WAITING"));
        let classifiers = from_config(&config);

        let timeout = Duration::from_secs(5);
        assert_eq!(
            classifiers.for_agent(AgentKind::Codex).classify("Ship it?", timeout).unwrap(),
            Verdict::WaitingInput
        );
        // `other` has no driver classifier, so it falls back to the default.
        assert_eq!(
            classifiers.for_agent(AgentKind::Other).classify("Ship it?", timeout).unwrap(),
            Verdict::Idle
        );
    }

    #[test]
    fn empty_override_program_disables_that_agent() {
        let mut config = ClassifierConfig::default();
        config.agents.insert(
            "claude".to_string(),
            ClassifierCommandConfig {
                program: " ".to_string(),
                args: vec![],
            },
        );
        let classifiers = from_config(&config);
        assert!(matches!(
            classifiers
                .for_agent(AgentKind::Claude)
                .classify("anything?", Duration::from_secs(1)),
            Err(ClassifierError::Disabled)
        ));
    }

    #[test]
    fn command_classifier_reads_stdout_verdict() {
        let classifier = CommandClassifier::new(
            "sh".to_string(),
            vec!["-c".to_string(), r#"cat >/dev/null; echo '{"verdict":"WAITING"}'"#.to_string()],
        );
        let verdict = classifier
            .classify("Want me to continue?", Duration::from_secs(5))
            .unwrap();
        assert_eq!(verdict, Verdict::WaitingInput);
    }

    #[test]
    fn command_classifier_substitutes_prompt_argument() {
        let classifier = CommandClassifier::new(
            "sh".to_string(),
            vec![
                "-c".to_string(),
                r#"case "$1" in *"all set"*) echo DONE;; *) echo WAITING;; esac"#.to_string(),
                "classify".to_string(),
                PROMPT_PLACEHOLDER.to_string(),
            ],
        );
        let verdict = classifier
            .classify("You're all set.", Duration::from_secs(5))
            .unwrap();
        assert_eq!(verdict, Verdict::Idle);
    }

    #[test]
    fn command_classifier_times_out() {
        let classifier = CommandClassifier::new(
            "sh".to_string(),
            vec!["-c".to_string(), "exec sleep 5".to_string()],
        );
        let started = Instant::now();
        let result = classifier.classify("hello?", Duration::from_millis(300));
        assert!(matches!(result, Err(ClassifierError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn command_classifier_reports_failures() {
        let classifier = CommandClassifier::new(
            "sh".to_string(),
            vec!["-c".to_string(), "exit 3".to_string()],
        );
        assert!(matches!(
            classifier.classify("hello?", Duration::from_secs(5)),
            Err(ClassifierError::Failed(_))
        ));

        let missing = CommandClassifier::new("/nonexistent/classifier".to_string(), vec![]);
        assert!(matches!(
            missing.classify("hello?", Duration::from_secs(1)),
            Err(ClassifierError::Spawn(_))
        ));
    }
}
