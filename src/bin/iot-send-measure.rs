// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
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

//! Send one measurement to an IoT instance.
//!
//! Provisions the device certificate on first use, then posts the
//! measurement over mutual TLS, retrying until it is accepted.
//!
//! # Usage
//!
//! ```text
//! iot-send-measure [OPTIONS] --device-id <ID> --device-alternate-id <ID> \
//!     --sensor-alternate-id <ID> --capability-alternate-id <ID> <MEASURE>...
//! ```
//!
//! # Exit status
//!
//! - `0`: measurement delivered, or interrupted (the key file is removed)
//! - HTTP status code: the identity service refused to issue a certificate
//! - `1`: any other error
//!
//! # Examples
//!
//! ```bash
//! iot-send-measure --instance tenant.example.com --user admin --password secret \
//!     --device-id 42 --device-alternate-id D1 \
//!     --sensor-alternate-id S1 --capability-alternate-id C1 21.5
//!
//! # Credentials and instance from a file
//! iot-send-measure --config /etc/iot-measure.toml \
//!     --device-id 42 --device-alternate-id D1 \
//!     --sensor-alternate-id S1 --capability-alternate-id C1 21.5
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::Value;

use iot_measure_client::convert::{CredentialConverter, OpensslCommandConverter};
use iot_measure_client::{
    ClientConfig, DeviceIdentity, FileConfig, Orchestrator, Result, RunOutcome, TelemetryError,
};

/// Send one measurement to an IoT instance over mutual TLS
#[derive(Parser)]
#[command(name = "iot-send-measure")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision a device certificate and deliver one measurement", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Instance host name or URL
    #[arg(short, long, value_name = "HOST")]
    instance: Option<String>,

    /// Identity service user
    #[arg(short, long, requires = "password")]
    user: Option<String>,

    /// Identity service password
    #[arg(short, long, requires = "user")]
    password: Option<String>,

    /// Device ID
    #[arg(long, value_name = "ID")]
    device_id: String,

    /// Device alternate ID
    #[arg(long, value_name = "ID")]
    device_alternate_id: String,

    /// Sensor alternate ID
    #[arg(long, value_name = "ID")]
    sensor_alternate_id: String,

    /// Capability alternate ID
    #[arg(long, value_name = "ID")]
    capability_alternate_id: String,

    /// Measured values, sent in order
    #[arg(required = true, value_name = "MEASURE")]
    measures: Vec<String>,

    /// Directory for the certificate and key files
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Certificate file name
    #[arg(long, value_name = "NAME")]
    certificate_file: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Delay between delivery attempts in seconds
    #[arg(long, value_name = "SECS")]
    retry_interval: Option<u64>,

    /// PEM bundle of CA certificates to trust
    #[arg(long, value_name = "PATH")]
    ca_file: Option<PathBuf>,

    /// Accept any server certificate (testing only)
    #[arg(long)]
    insecure: bool,

    /// Key conversion engine
    #[arg(long, value_enum, default_value_t = Engine::Native)]
    converter: Engine,

    /// openssl executable for the openssl-cli engine
    #[arg(long, value_name = "PATH", default_value = "openssl")]
    openssl: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Engine {
    /// In-process conversion
    Native,
    /// Run `openssl rsa`
    OpensslCli,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(RunOutcome::Delivered { .. }) | Ok(RunOutcome::Interrupted) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(hint) = failure_hint(&e) {
                eprintln!("{}", hint);
            }
            e.exit_code()
        }
    };

    drop(runtime);
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    let config = build_config(&cli)?;
    tracing::debug!("{:?}", config);

    let converter = match cli.converter {
        Engine::Native => CredentialConverter::native(),
        Engine::OpensslCli => CredentialConverter::new(OpensslCommandConverter::new(&cli.openssl)),
    };

    let identity = DeviceIdentity::new(
        cli.device_id,
        cli.device_alternate_id,
        cli.sensor_alternate_id,
        cli.capability_alternate_id,
    );
    let measurement = identity.measurement(cli.measures.into_iter().map(Value::String).collect());

    Orchestrator::new(config, converter)
        .run(&identity, &measurement, shutdown_signal())
        .await
}

fn build_config(cli: &Cli) -> Result<ClientConfig> {
    let mut builder = ClientConfig::builder();

    if let Some(ref path) = cli.config {
        builder = FileConfig::load(path)?.apply(builder)?;
    }
    if let Some(ref instance) = cli.instance {
        builder = builder.instance(instance)?;
    }
    if let (Some(user), Some(password)) = (&cli.user, &cli.password) {
        builder = builder.http_auth(user, password);
    }
    if let Some(ref dir) = cli.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(ref name) = cli.certificate_file {
        builder = builder.certificate_file_name(name);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = cli.retry_interval {
        builder = builder.retry_interval(Duration::from_secs(secs));
    }
    if let Some(ref ca_file) = cli.ca_file {
        builder = builder.trust_explicit(vec![std::fs::read(ca_file)?]);
    }
    if cli.insecure {
        builder = builder.trust_any_insecure();
    }

    builder.build()
}

/// Follow-up advice for errors that are not about configuration or credentials.
fn failure_hint(err: &TelemetryError) -> Option<&'static str> {
    if err.is_fatal_config() {
        None
    } else {
        Some("The ingestion service could not be reached; the key file was kept for the next run.")
    }
}

/// Completes on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
