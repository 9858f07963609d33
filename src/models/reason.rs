use serde::Serialize;

/// Why an evaluation produced the value it did.
///
/// `RuleMatch` and `PrerequisiteFailed` carry the identifying
/// information a caller needs without re-walking the flag.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    Off,
    TargetMatch,
    RuleMatch {
        rule_index: usize,
        rule_id: String,
    },
    PrerequisiteFailed {
        prerequisite_key: String,
    },
    Fallthrough,
    Error {
        error_kind: ErrorKind,
    },
}

/// Non-throwing evaluation error kinds. All surface through
/// `Reason::Error` and fall back to the caller's typed default value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ClientNotReady,
    FlagNotFound,
    UserNotSpecified,
    MalformedFlag,
    WrongType,
    Exception,
}

/// The result of one `variation*Detail` call: the resolved value, the
/// variation index it came from (if any), and the reason.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detail<T> {
    pub value: T,
    pub variation_index: Option<usize>,
    pub reason: Reason,
}

impl<T> Detail<T> {
    pub fn new(value: T, variation_index: Option<usize>, reason: Reason) -> Self {
        Self {
            value,
            variation_index,
            reason,
        }
    }

    pub fn error(default: T, kind: ErrorKind) -> Self {
        Self {
            value: default,
            variation_index: None,
            reason: Reason::Error { error_kind: kind },
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Detail<U> {
        Detail {
            value: f(self.value),
            variation_index: self.variation_index,
            reason: self.reason,
        }
    }
}
