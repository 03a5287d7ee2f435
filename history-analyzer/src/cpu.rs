//! Per-step CPU usage records
//!
//! `Dcpu=<user>:<system>` reports the CPU time used during a battery level
//! step, followed by bare `<uid>:<user>:<system>` tokens for the top users.
//! `Dpst` reports the global /proc/stat breakdown; its six fields arrive as the
//! `Dpst` value and the bare integer tokens that follow it.

use crate::types::TokenError;
use serde::{Deserialize, Serialize};

const DCPU: &str = "Dcpu";
const DPST: &str = "Dpst";

/// A top CPU consumer within a [`DcpuRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcpuApp {
    pub uid: i32,
    pub package: String,
    pub user_ms: i64,
    pub system_ms: i64,
}

/// CPU time used during one battery level step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcpuRecord {
    pub user_ms: i64,
    pub system_ms: i64,
    pub apps: Vec<DcpuApp>,
}

fn malformed(record: &'static str, value: &str) -> TokenError {
    TokenError::MalformedRecord {
        record,
        value: value.to_string(),
    }
}

fn parse_fields<const N: usize>(record: &'static str, value: &str) -> Result<[i64; N], TokenError> {
    let mut out = [0i64; N];
    let mut parts = value.split(':');
    for slot in out.iter_mut() {
        *slot = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(|| malformed(record, value))?;
    }
    if parts.next().is_some() {
        return Err(malformed(record, value));
    }
    Ok(out)
}

impl DcpuRecord {
    /// Parse the `<user>:<system>` value of a `Dcpu` token
    pub fn parse(value: &str) -> Result<Self, TokenError> {
        let [user_ms, system_ms] = parse_fields::<2>(DCPU, value)?;
        Ok(Self {
            user_ms,
            system_ms,
            apps: Vec::new(),
        })
    }
}

impl DcpuApp {
    /// Parse a bare `<uid>:<user>:<system>` continuation token
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let [uid, user_ms, system_ms] = parse_fields::<3>(DCPU, raw)?;
        let uid = i32::try_from(uid).map_err(|_| malformed(DCPU, raw))?;
        Ok(Self {
            uid,
            package: String::new(),
            user_ms,
            system_ms,
        })
    }

    /// Whether a bare token has the `<uid>:<user>:<system>` shape
    pub fn matches(raw: &str) -> bool {
        raw.split(':').count() == 3 && raw.split(':').all(|p| p.parse::<i64>().is_ok())
    }
}

/// Global /proc/stat breakdown for one step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpstRecord {
    pub user: i64,
    pub system: i64,
    pub iowait: i64,
    pub irq: i64,
    pub softirq: i64,
    pub idle: i64,
}

/// Field a pending `Dpst` record expects next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpstField {
    User,
    System,
    IoWait,
    Irq,
    SoftIrq,
    Idle,
}

impl DpstField {
    fn next(self) -> Option<Self> {
        match self {
            DpstField::User => Some(DpstField::System),
            DpstField::System => Some(DpstField::IoWait),
            DpstField::IoWait => Some(DpstField::Irq),
            DpstField::Irq => Some(DpstField::SoftIrq),
            DpstField::SoftIrq => Some(DpstField::Idle),
            DpstField::Idle => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            DpstField::User => "user",
            DpstField::System => "system",
            DpstField::IoWait => "iowait",
            DpstField::Irq => "irq",
            DpstField::SoftIrq => "softirq",
            DpstField::Idle => "idle",
        }
    }
}

impl DpstRecord {
    fn set(&mut self, field: DpstField, value: i64) {
        match field {
            DpstField::User => self.user = value,
            DpstField::System => self.system = value,
            DpstField::IoWait => self.iowait = value,
            DpstField::Irq => self.irq = value,
            DpstField::SoftIrq => self.softirq = value,
            DpstField::Idle => self.idle = value,
        }
    }
}

/// Assembles a [`DpstRecord`] from consecutive tokens.
///
/// A record is only produced once all six fields have been read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DpstAssembler {
    #[default]
    Idle,
    Awaiting {
        next: DpstField,
        partial: DpstRecord,
    },
}

impl DpstAssembler {
    pub fn is_pending(&self) -> bool {
        matches!(self, DpstAssembler::Awaiting { .. })
    }

    /// Start a new record from a `Dpst[=<user>]` token
    ///
    /// A record still pending is dropped and reported.
    pub fn begin(&mut self, value: &str) -> Result<(), TokenError> {
        let dropped = self.interrupt();
        *self = DpstAssembler::Awaiting {
            next: DpstField::User,
            partial: DpstRecord::default(),
        };
        if !value.is_empty() {
            // A first field carried by the key itself cannot complete the record
            if let Err(err) = self.feed(value) {
                if let Some(dropped) = dropped {
                    log::warn!("{}", dropped);
                }
                return Err(err);
            }
        }
        dropped.map_or(Ok(()), Err)
    }

    /// Feed the next bare integer; returns the record when it is complete
    pub fn feed(&mut self, value: &str) -> Result<Option<DpstRecord>, TokenError> {
        let DpstAssembler::Awaiting { next: field, partial } = self else {
            return Err(malformed(DPST, value));
        };
        let parsed: i64 = match value.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                *self = DpstAssembler::Idle;
                return Err(malformed(DPST, value));
            }
        };
        partial.set(*field, parsed);
        match field.next() {
            Some(following) => {
                *field = following;
                Ok(None)
            }
            None => {
                let record = std::mem::take(partial);
                *self = DpstAssembler::Idle;
                Ok(Some(record))
            }
        }
    }

    /// Abandon a pending record, reporting which field was missing
    pub fn interrupt(&mut self) -> Option<TokenError> {
        match std::mem::take(self) {
            DpstAssembler::Idle => None,
            DpstAssembler::Awaiting { next, .. } => Some(TokenError::IncompleteRecord {
                record: DPST,
                detail: format!("missing {} and later fields", next.name()),
            }),
        }
    }
}
