//! Validation data generation: the periodic submit loop and one-shot mode.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{error, info, warn};
use validata_core::device::DeviceInfo;
use validata_core::nac::Nac;
use validata_core::net::{SubmitClient, ValidationClient};

use crate::shutdown::ShutdownSignal;

pub fn run(url: &str, token: Option<String>, interval: Duration, binary: &Path) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!("submit URL must be http or https: {url}");
    }

    let shutdown = Arc::new(ShutdownSignal::new());
    let handler_side = shutdown.clone();
    ctrlc::set_handler(move || handler_side.trigger())
        .context("failed to install Ctrl-C handler")?;

    let (nac, device, client, cert) = bootstrap(binary)?;
    let submit = SubmitClient::new(url, token, &device);

    while !shutdown.is_shutdown() {
        info!("generating validation data...");
        match generate(&nac, &client, &cert) {
            Ok(validation_data) => match submit.submit(&validation_data, &device) {
                Ok(()) => info!(
                    "submitted {} bytes of validation data",
                    validation_data.len()
                ),
                Err(e) => error!("failed to submit validation data: {e}"),
            },
            Err(e) => error!("failed to generate validation data: {e}"),
        }
        if shutdown.wait(interval) {
            break;
        }
    }

    info!("shutting down");
    Ok(())
}

pub fn once(binary: &Path) -> Result<()> {
    let (nac, _device, client, cert) = bootstrap(binary)?;
    let validation_data = generate(&nac, &client, &cert)?;
    println!("{}", BASE64.encode(&validation_data));
    Ok(())
}

/// Resolve the binary, probe the host, and fetch the certificate. A sanity
/// probe failure surfaces here and aborts startup: once address resolution
/// is untrusted there is no degraded mode to fall back to.
fn bootstrap(binary: &Path) -> Result<(Nac, DeviceInfo, ValidationClient, Vec<u8>)> {
    let device = DeviceInfo::probe().unwrap_or_else(|e| {
        warn!("device probe failed ({e}); reporting placeholder identity");
        DeviceInfo::unknown()
    });

    info!("loading {}", binary.display());
    let nac = Nac::load_from(binary, &device).context("address resolution failed")?;

    let client = ValidationClient::new(&device);
    info!("fetching validation certificate...");
    let cert = client.fetch_cert().context("failed to fetch certificate")?;
    info!("initialization complete");

    Ok((nac, device, client, cert))
}

/// One full validation attempt. The session never outlives the attempt;
/// any failure discards it and the next attempt starts from `init`.
fn generate(nac: &Nac, client: &ValidationClient, cert: &[u8]) -> Result<Vec<u8>> {
    let (session, request) = nac.init(cert)?;
    let session_info = client
        .initialize_validation(&request)
        .context("failed to initialize validation")?;
    nac.key_establishment(&session, &session_info)?;
    Ok(nac.sign(session)?)
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_url_scheme_is_validated() {
        let err = super::run(
            "ftp://example.com",
            None,
            std::time::Duration::from_secs(1),
            std::path::Path::new("/nonexistent"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }
}
