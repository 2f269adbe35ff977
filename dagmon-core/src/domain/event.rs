//! Job event log wire records
//!
//! The event log is a JSON-lines stream of [`JobEvent`] records, strictly
//! time-ordered as received. Events reference the scheduler job id
//! (cluster/proc) of an attempt; a node's existence is established lazily by
//! the first submit event naming it in the `dag_node` field.

use serde::Deserialize;

/// Lifecycle event type tag.
///
/// Unrecognized tags deserialize to [`EventKind::Unknown`] so a single bad
/// record cannot abort the fold; the fold surfaces them as warnings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum EventKind {
    Submit,
    Execute,
    Terminated,
    PostScriptTerminated,
    ShadowException,
    ReconnectFailed,
    Evicted,
    Aborted,
    Held,
    Released,
    AdInformation,
    ImageSize,
    Disconnected,
    Reconnected,
    Unknown(String),
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "submit" => EventKind::Submit,
            "execute" => EventKind::Execute,
            "terminated" => EventKind::Terminated,
            "post_script_terminated" => EventKind::PostScriptTerminated,
            "shadow_exception" => EventKind::ShadowException,
            "reconnect_failed" => EventKind::ReconnectFailed,
            "evicted" => EventKind::Evicted,
            "aborted" => EventKind::Aborted,
            "held" => EventKind::Held,
            "released" => EventKind::Released,
            "ad_information" => EventKind::AdInformation,
            "image_size" => EventKind::ImageSize,
            "disconnected" => EventKind::Disconnected,
            "reconnected" => EventKind::Reconnected,
            _ => EventKind::Unknown(tag),
        }
    }
}

/// One immutable event log record.
///
/// Payload fields are optional on the wire; each event kind reads only the
/// fields it defines. CPU usage arrives either as the composite
/// `total_remote_usage` string (`"Usr D H:M:S, Sys D H:M:S"`) or as the
/// separate `remote_user_cpu`/`remote_sys_cpu` numeric fields.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Event timestamp, unix seconds.
    pub time: i64,
    pub cluster: i64,
    #[serde(default)]
    pub proc: i64,
    /// Free-text DAG node name (`"Job<N>"`), present on submit and
    /// post-script events.
    #[serde(default)]
    pub dag_node: Option<String>,
    #[serde(default)]
    pub terminated_normally: Option<bool>,
    #[serde(default)]
    pub return_value: Option<i64>,
    #[serde(default)]
    pub total_remote_usage: Option<String>,
    #[serde(default)]
    pub remote_user_cpu: Option<f64>,
    #[serde(default)]
    pub remote_sys_cpu: Option<f64>,
    /// Execution site reported by the glide-in ad; `"$$(...)"` template
    /// placeholders mean the site is not yet resolved.
    #[serde(default)]
    pub site: Option<String>,
    /// Resident set size in kilobytes, on image-size events.
    #[serde(default)]
    pub resident_set_size: Option<u64>,
}
