//! Pairing code presentation.
//!
//! When the transport asks for pairing, somebody has to see the code. An
//! interactive run draws it as a QR code on the terminal; an unattended run
//! logs it under a `pairing_code` field so it can be grepped out of the job
//! logs.

use std::sync::Arc;

use qrcode::render::unicode;
use qrcode::QrCode;

/// Shows a pairing code to an operator.
pub trait AuthPresenter: Send + Sync {
    fn present(&self, pairing_code: &str);
}

/// Renders the pairing code as a QR code on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPresenter;

impl TerminalPresenter {
    /// The QR code as unicode half blocks, or `None` if the code does not fit.
    pub fn render(pairing_code: &str) -> Option<String> {
        let code = QrCode::new(pairing_code.as_bytes()).ok()?;
        Some(
            code.render::<unicode::Dense1x2>()
                .dark_color(unicode::Dense1x2::Light)
                .light_color(unicode::Dense1x2::Dark)
                .build(),
        )
    }
}

impl AuthPresenter for TerminalPresenter {
    fn present(&self, pairing_code: &str) {
        match Self::render(pairing_code) {
            Some(image) => {
                eprintln!("\nScan this code with the primary device to link it:\n\n{image}\n");
                tracing::info!("pairing code rendered on terminal");
            }
            None => {
                tracing::warn!(
                    pairing_code = %pairing_code,
                    "pairing code too long to render, logging instead"
                );
            }
        }
    }
}

/// Logs the pairing code as a structured field.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl AuthPresenter for LogPresenter {
    fn present(&self, pairing_code: &str) {
        tracing::warn!(
            pairing_code = %pairing_code,
            "pairing required: link this device from the primary device"
        );
    }
}

/// The presenter for an interactive or unattended run.
pub fn presenter_for(interactive: bool) -> Arc<dyn AuthPresenter> {
    if interactive {
        Arc::new(TerminalPresenter)
    } else {
        Arc::new(LogPresenter)
    }
}
