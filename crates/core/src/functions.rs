//! Assistant Functions
//!
//! The functions the language model may call during a turn. Each function
//! publishes a [`FunctionSpec`] (name, description, ordered typed parameters)
//! that is sent to the model verbatim, and the [`FunctionDispatcher`] routes
//! a model's [`FunctionCallRequest`] to the matching handler after checking
//! the arguments against that spec.
//!
//! Every invocation yields a [`FunctionCallResult`]. Gateway failures and
//! invalid input are turned into text the model can relay; nothing is
//! propagated to the caller as an error.

use crate::email::{EmailGateway, OutgoingEmail, latest};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::{Arc, LazyLock};
use tracing::{error, info, warn};

pub const INVALID_EMAIL_REPLY: &str =
    "The email address seems incorrect. Please provide a valid one.";
pub const SEND_FAILED_REPLY: &str =
    "There was an error sending your email. Please try again later.";
pub const NO_SUBJECTS_REPLY: &str = "No email subjects could be retrieved at this time.";

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is a valid regex")
});

/// Checks the `local-part@domain.tld` shape. This is not full RFC 5322
/// validation.
pub fn is_valid_email(address: &str) -> bool {
    EMAIL_PATTERN.is_match(address)
}

// --- Call and Result Types ---

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// Model-assigned id used to pair the result with the request.
    pub id: String,
    pub name: String,
    /// Raw arguments as the model produced them; expected to be a JSON object.
    pub arguments: Value,
}

/// The textual outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCallResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    /// Set when the call could not be executed at all (unknown function or
    /// malformed arguments).
    pub is_error: bool,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FunctionError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Invalid arguments for {function}: {reason}")]
    InvalidArguments { function: String, reason: String },
}

// --- Parameter Contracts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
}

impl ParamType {
    fn json_type(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
        }
    }

    /// Returns the value normalised to this type, or `None` on a mismatch.
    /// Integral floats such as `5.0` are accepted as integers.
    fn coerce(self, value: &Value) -> Option<Value> {
        match self {
            ParamType::String => value.as_str().map(|s| Value::String(s.to_string())),
            ParamType::Integer => value.as_i64().map(Value::from).or_else(|| {
                value
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && f.is_finite())
                    .map(|f| Value::from(f as i64))
            }),
        }
    }
}

/// One declared parameter. A parameter with a default is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub description: Option<&'static str>,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamType) -> Self {
        Self {
            name,
            kind,
            description: None,
            default: None,
        }
    }

    pub fn optional(name: &'static str, kind: ParamType, default: Value) -> Self {
        Self {
            name,
            kind,
            description: None,
            default: Some(default),
        }
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = Some(description);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// The contract of one callable function, as advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

impl FunctionSpec {
    /// JSON Schema object describing the parameters.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.kind.json_type()));
            if let Some(description) = param.description {
                prop.insert("description".into(), json!(description));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.to_string(), Value::Object(prop));
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.is_required())
            .map(|p| p.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Checks `arguments` against the declared parameters, filling defaults
    /// for omitted optional ones. Undeclared keys are dropped.
    pub fn validate(&self, arguments: &Value) -> Result<Map<String, Value>, FunctionError> {
        let invalid = |reason: String| FunctionError::InvalidArguments {
            function: self.name.to_string(),
            reason,
        };

        let empty = Map::new();
        let provided = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => return Err(invalid(format!("expected an object, got {}", other))),
        };

        let mut validated = Map::new();
        for param in &self.params {
            match provided.get(param.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let coerced = param.kind.coerce(value).ok_or_else(|| {
                        invalid(format!(
                            "'{}' must be of type {}",
                            param.name,
                            param.kind.json_type()
                        ))
                    })?;
                    validated.insert(param.name.to_string(), coerced);
                }
                None => match &param.default {
                    Some(default) => {
                        validated.insert(param.name.to_string(), default.clone());
                    }
                    None => return Err(invalid(format!("missing required '{}'", param.name))),
                },
            }
        }

        for key in provided.keys() {
            if !self.params.iter().any(|p| p.name == key) {
                warn!(function = self.name, argument = %key, "Ignoring undeclared argument");
            }
        }
        Ok(validated)
    }
}

// --- Function Trait and Dispatcher ---

/// A function the model can call.
///
/// `call` receives arguments already checked against `spec()`. Failures the
/// user should hear about are returned as `Ok` text.
#[async_trait]
pub trait AssistantFunction: Send + Sync {
    fn spec(&self) -> &FunctionSpec;

    async fn call(&self, arguments: Map<String, Value>) -> Result<String, FunctionError>;
}

/// Registry of callable functions, looked up by name.
pub struct FunctionDispatcher {
    functions: Vec<Box<dyn AssistantFunction>>,
}

impl FunctionDispatcher {
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
        }
    }

    /// The fixed registry used by room sessions: `send_email` and
    /// `read_latest_email_subjects` backed by `gateway`.
    pub fn email_assistant(gateway: Arc<dyn EmailGateway>, sender_email: String) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(SendEmail::new(gateway.clone(), sender_email));
        dispatcher.register(ReadLatestEmailSubjects::new(gateway));
        dispatcher
    }

    pub fn register(&mut self, function: impl AssistantFunction + 'static) {
        self.functions.push(Box::new(function));
    }

    pub fn specs(&self) -> impl Iterator<Item = &FunctionSpec> {
        self.functions.iter().map(|f| f.spec())
    }

    fn lookup(&self, name: &str) -> Result<&dyn AssistantFunction, FunctionError> {
        self.functions
            .iter()
            .find(|f| f.spec().name == name)
            .map(|f| f.as_ref())
            .ok_or_else(|| FunctionError::UnknownFunction(name.to_string()))
    }

    /// Runs one requested call. Always produces a result.
    pub async fn invoke(&self, request: &FunctionCallRequest) -> FunctionCallResult {
        info!(function = %request.name, call_id = %request.id, "Dispatching function call");

        let outcome = match self.lookup(&request.name) {
            Ok(function) => match function.spec().validate(&request.arguments) {
                Ok(arguments) => function.call(arguments).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(content) => FunctionCallResult {
                call_id: request.id.clone(),
                name: request.name.clone(),
                content,
                is_error: false,
            },
            Err(e) => {
                warn!(function = %request.name, error = %e, "Function call rejected");
                FunctionCallResult {
                    call_id: request.id.clone(),
                    name: request.name.clone(),
                    content: e.to_string(),
                    is_error: true,
                }
            }
        }
    }
}

impl Default for FunctionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_args<T: for<'de> Deserialize<'de>>(
    spec: &FunctionSpec,
    arguments: Map<String, Value>,
) -> Result<T, FunctionError> {
    serde_json::from_value(Value::Object(arguments)).map_err(|e| FunctionError::InvalidArguments {
        function: spec.name.to_string(),
        reason: e.to_string(),
    })
}

// --- send_email ---

#[derive(Deserialize, Debug)]
pub struct SendEmailArgs {
    pub recipient_email: String,
    pub subject: String,
    pub message_body: String,
}

pub struct SendEmail {
    gateway: Arc<dyn EmailGateway>,
    sender_email: String,
    spec: FunctionSpec,
}

impl SendEmail {
    pub fn new(gateway: Arc<dyn EmailGateway>, sender_email: String) -> Self {
        Self {
            gateway,
            sender_email,
            spec: FunctionSpec {
                name: "send_email",
                description: "Send an email with the specified subject and message to a recipient.",
                params: vec![
                    ParamSpec::required("recipient_email", ParamType::String),
                    ParamSpec::required("subject", ParamType::String),
                    ParamSpec::required("message_body", ParamType::String),
                ],
            },
        }
    }
}

#[async_trait]
impl AssistantFunction for SendEmail {
    fn spec(&self) -> &FunctionSpec {
        &self.spec
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String, FunctionError> {
        let args: SendEmailArgs = decode_args(&self.spec, arguments)?;
        if !is_valid_email(&args.recipient_email) {
            info!(recipient = %args.recipient_email, "Rejected malformed recipient address");
            return Ok(INVALID_EMAIL_REPLY.to_string());
        }

        let email = OutgoingEmail {
            from: self.sender_email.clone(),
            to: args.recipient_email.clone(),
            subject: args.subject,
            body: args.message_body,
        };
        let gateway = self.gateway.clone();

        match tokio::task::spawn_blocking(move || gateway.send(&email)).await {
            Ok(Ok(())) => {
                info!(recipient = %args.recipient_email, "Email sent");
                Ok(format!(
                    "Email sent successfully to {}.",
                    args.recipient_email
                ))
            }
            Ok(Err(e)) => {
                error!(error = %e, "Error sending email");
                Ok(SEND_FAILED_REPLY.to_string())
            }
            Err(e) => {
                error!(error = %e, "Email worker did not complete");
                Ok(SEND_FAILED_REPLY.to_string())
            }
        }
    }
}

// --- read_latest_email_subjects ---

#[derive(Deserialize, Debug)]
pub struct ReadLatestEmailSubjectsArgs {
    pub count: i64,
}

pub struct ReadLatestEmailSubjects {
    gateway: Arc<dyn EmailGateway>,
    spec: FunctionSpec,
}

impl ReadLatestEmailSubjects {
    pub const DEFAULT_COUNT: i64 = 10;

    pub fn new(gateway: Arc<dyn EmailGateway>) -> Self {
        Self {
            gateway,
            spec: FunctionSpec {
                name: "read_latest_email_subjects",
                description: "Reads the subjects of the latest emails from the inbox. Returns the subjects as a comma-separated string.",
                params: vec![
                    ParamSpec::optional("count", ParamType::Integer, json!(Self::DEFAULT_COUNT))
                        .describe("The number of latest emails to read"),
                ],
            },
        }
    }
}

#[async_trait]
impl AssistantFunction for ReadLatestEmailSubjects {
    fn spec(&self) -> &FunctionSpec {
        &self.spec
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String, FunctionError> {
        let args: ReadLatestEmailSubjectsArgs = decode_args(&self.spec, arguments)?;
        let count = usize::try_from(args.count).unwrap_or(0);
        if count == 0 {
            return Ok(NO_SUBJECTS_REPLY.to_string());
        }

        let gateway = self.gateway.clone();
        let subjects =
            match tokio::task::spawn_blocking(move || gateway.fetch_latest_subjects(count)).await {
                Ok(Ok(subjects)) => subjects,
                Ok(Err(e)) => {
                    error!(error = %e, "Error reading emails");
                    Vec::new()
                }
                Err(e) => {
                    error!(error = %e, "Inbox worker did not complete");
                    Vec::new()
                }
            };

        let subjects = latest(&subjects, count);
        if subjects.is_empty() {
            Ok(NO_SUBJECTS_REPLY.to_string())
        } else {
            Ok(format!("Latest email subjects: {}", subjects.join(", ")))
        }
    }
}
