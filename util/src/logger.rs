// Copyright 2024 The Ember Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Logging wrapper to be used throughout all crates in the workspace.

use crate::types::{LogLevel, LoggingConfig};
use crate::Mutex;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;

const LOGGING_PATTERN: &str = "{d(%Y%m%d %H:%M:%S%.3f)} {h({l})} {M} - {m}{n}";

lazy_static! {
	/// Flag to observe whether logging was explicitly initialized.
	static ref WAS_INIT: Mutex<bool> = Mutex::new(false);
}

fn convert_log_level(in_level: &LogLevel) -> LevelFilter {
	match *in_level {
		LogLevel::Info => LevelFilter::Info,
		LogLevel::Warning => LevelFilter::Warn,
		LogLevel::Debug => LevelFilter::Debug,
		LogLevel::Trace => LevelFilter::Trace,
		LogLevel::Error => LevelFilter::Error,
	}
}

/// Initialize the logger with the given configuration. Subsequent calls
/// are ignored so tests and embedders can race freely.
pub fn init_logger(config: Option<LoggingConfig>) {
	let mut was_init = WAS_INIT.lock();
	if *was_init {
		return;
	}

	let config = config.unwrap_or_default();
	let mut appenders = vec![];
	let mut root = Root::builder();
	let mut level_overall = LevelFilter::Off;

	if config.log_to_stdout {
		let level = convert_log_level(&config.stdout_log_level);
		level_overall = std::cmp::max(level_overall, level);
		let stdout = ConsoleAppender::builder()
			.encoder(Box::new(PatternEncoder::new(LOGGING_PATTERN)))
			.build();
		appenders.push(
			Appender::builder()
				.filter(Box::new(ThresholdFilter::new(level)))
				.build("stdout", Box::new(stdout)),
		);
		root = root.appender("stdout");
	}

	if config.log_to_file {
		let level = convert_log_level(&config.file_log_level);
		level_overall = std::cmp::max(level_overall, level);
		let file = FileAppender::builder()
			.encoder(Box::new(PatternEncoder::new(LOGGING_PATTERN)))
			.append(config.log_file_append)
			.build(&config.log_file_path);
		if let Ok(file) = file {
			appenders.push(
				Appender::builder()
					.filter(Box::new(ThresholdFilter::new(level)))
					.build("file", Box::new(file)),
			);
			root = root.appender("file");
		}
	}

	if let Ok(config) = Config::builder()
		.appenders(appenders)
		.build(root.build(level_overall))
	{
		let _ = log4rs::init_config(config);
		*was_init = true;
	}
}

/// Initializes the logger for unit and integration tests: stdout only,
/// debug level, no log file.
pub fn init_test_logger() {
	init_logger(Some(LoggingConfig {
		log_to_stdout: true,
		stdout_log_level: LogLevel::Debug,
		log_to_file: false,
		..LoggingConfig::default()
	}));
}
