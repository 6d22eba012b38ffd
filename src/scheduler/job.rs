use chrono::Local;
use serde::{Deserialize, Serialize};

/// Layout of [`Job::timestamp`], local wall-clock time.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Source parameters of a shake scenario.
///
/// The focal mechanism (`strike`, `dip`, `rake`) is optional and each
/// angle may be given on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub magnitude: f64,
    pub longitude: f64,
    pub latitude: f64,
    /// Hypocentral depth in km
    pub depth: f64,
    pub strike: Option<f64>,
    pub dip: Option<f64>,
    pub rake: Option<f64>,
}

impl JobParams {
    pub fn new(magnitude: f64, longitude: f64, latitude: f64, depth: f64) -> Self {
        Self {
            magnitude,
            longitude,
            latitude,
            depth,
            strike: None,
            dip: None,
            rake: None,
        }
    }

    pub fn with_mechanism(
        mut self,
        strike: Option<f64>,
        dip: Option<f64>,
        rake: Option<f64>,
    ) -> Self {
        self.strike = strike;
        self.dip = dip;
        self.rake = rake;
        self
    }

    /// Positional worker arguments: the four required values followed by
    /// the leading run of present optional angles.
    ///
    /// Arguments are matched by position on the worker side, so an angle
    /// given after a missing one cannot be passed and is left out
    /// (see [`JobParams::unpassable_angles`]).
    pub fn positional_args(&self) -> Vec<String> {
        let mut args = vec![
            format_float(self.magnitude),
            format_float(self.longitude),
            format_float(self.latitude),
            format_float(self.depth),
        ];
        args.extend(
            self.optional_angles()
                .into_iter()
                .map_while(|(_, value)| value.map(format_float)),
        );
        args
    }

    /// Names of present angles that follow a missing one.
    pub fn unpassable_angles(&self) -> Vec<&'static str> {
        self.optional_angles()
            .into_iter()
            .skip_while(|(_, value)| value.is_some())
            .filter(|(_, value)| value.is_some())
            .map(|(name, _)| name)
            .collect()
    }

    fn optional_angles(&self) -> [(&'static str, Option<f64>); 3] {
        [("strike", self.strike), ("dip", self.dip), ("rake", self.rake)]
    }
}

/// Render a float the way the job table and the worker expect it,
/// always with a fractional part (`5.0`, not `5`).
pub fn format_float(value: f64) -> String {
    format!("{:?}", value)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub timestamp: String,
    pub params: JobParams,
    pub completed: bool,
    /// Why the job can no longer complete (worker never started, timed out)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Job {
    pub fn new(id: u64, params: JobParams) -> Self {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        Self::with_timestamp(id, params, timestamp)
    }

    pub fn with_timestamp(id: u64, params: JobParams, timestamp: String) -> Self {
        Self {
            id,
            timestamp,
            params,
            completed: false,
            failure: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        if self.completed {
            JobStatus::Completed
        } else if self.failure.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Pending
        }
    }

    /// Record a completion report. A late report on a failed job wins over
    /// the failure. Returns false if the job was already completed.
    pub fn mark_completed(&mut self) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        self.failure = None;
        true
    }

    /// Mark a pending job as failed. Completed or already failed jobs are
    /// left untouched and false is returned.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> bool {
        if self.status() != JobStatus::Pending {
            return false;
        }
        self.failure = Some(reason.into());
        true
    }

    /// Full worker argument list: job ID first, then the parameters.
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec![self.id.to_string()];
        args.extend(self.params.positional_args());
        args
    }
}
