use std::error::Error;
use tracing::{error, info, warn};

/// Severity attached to a tracked trace message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
	Information,
	Warning,
}

/// Fire-and-forget observability sink.
///
/// Nothing in the bot depends on a sink call succeeding; implementations must not block.
pub trait Telemetry: Send + Sync {
	fn track_event(&self, name: &str);
	fn track_trace(&self, message: &str, severity: Severity);
	fn track_exception(&self, error: &(dyn Error + 'static));
}

/// Sink writing everything through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
	fn track_event(&self, name: &str) {
		info!(target: "telemetry", event = name);
	}

	fn track_trace(&self, message: &str, severity: Severity) {
		match severity {
			Severity::Information => info!(target: "telemetry", "{}", message),
			Severity::Warning => warn!(target: "telemetry", "{}", message),
		}
	}

	fn track_exception(&self, error: &(dyn Error + 'static)) {
		let mut chain = error.to_string();
		let mut source = error.source();
		while let Some(cause) = source {
			chain.push_str(": ");
			chain.push_str(&cause.to_string());
			source = cause.source();
		}
		error!(target: "telemetry", error = %chain, "exception tracked");
	}
}

#[cfg(test)]
pub mod testing {
	use super::{Severity, Telemetry};
	use std::error::Error;
	use std::sync::Mutex;

	#[derive(Clone, Debug, PartialEq, Eq)]
	pub enum Record {
		Event(String),
		Trace(String, Severity),
		Exception(String),
	}

	/// Sink keeping every call in memory so tests can assert on it.
	#[derive(Debug, Default)]
	pub struct RecordingTelemetry {
		records: Mutex<Vec<Record>>,
	}

	impl RecordingTelemetry {
		pub fn records(&self) -> Vec<Record> {
			self.records.lock().unwrap().clone()
		}

		pub fn exceptions(&self) -> Vec<String> {
			self.records()
				.into_iter()
				.filter_map(|record| match record {
					Record::Exception(message) => Some(message),
					_ => None,
				})
				.collect()
		}
	}

	impl Telemetry for RecordingTelemetry {
		fn track_event(&self, name: &str) {
			self.records.lock().unwrap().push(Record::Event(name.to_string()));
		}

		fn track_trace(&self, message: &str, severity: Severity) {
			self.records
				.lock()
				.unwrap()
				.push(Record::Trace(message.to_string(), severity));
		}

		fn track_exception(&self, error: &(dyn Error + 'static)) {
			self.records.lock().unwrap().push(Record::Exception(error.to_string()));
		}
	}
}
