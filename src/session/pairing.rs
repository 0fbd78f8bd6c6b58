//! Pending pairing code and its QR renderings.

use std::sync::{Arc, PoisonError, RwLock};

use base64::Engine;
use qrcode::QrCode;
use qrcode::render::{svg, unicode};
use qrcode::types::QrError;

/// At most one pending pairing code. Written by the session manager, read by
/// the HTTP surface.
#[derive(Clone, Default)]
pub struct PairingState {
    code: Arc<RwLock<Option<String>>>,
}

impl PairingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, code: String) {
        *self.code.write().unwrap_or_else(PoisonError::into_inner) = Some(code);
    }

    pub fn clear(&self) {
        *self.code.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn current(&self) -> Option<String> {
        self.code.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_pending(&self) -> bool {
        self.code.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

/// Render a pairing code as an SVG QR image inside a `data:` URL.
pub fn svg_data_url(code: &str) -> Result<String, QrError> {
    let qr = QrCode::new(code.as_bytes())?;
    let image = qr
        .render::<svg::Color>()
        .min_dimensions(300, 300)
        .build();
    let encoded = base64::engine::general_purpose::STANDARD.encode(image.as_bytes());
    Ok(format!("data:image/svg+xml;base64,{encoded}"))
}

/// Render a pairing code for a terminal (two rows per character).
pub fn terminal_qr(code: &str) -> Result<String, QrError> {
    let qr = QrCode::new(code.as_bytes())?;
    Ok(qr
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let state = PairingState::new();
        assert!(!state.is_pending());

        state.set("2@first".into());
        state.set("2@second".into());
        assert_eq!(state.current().as_deref(), Some("2@second"));

        let reader = state.clone();
        state.clear();
        assert!(reader.current().is_none());
    }

    #[test]
    fn test_svg_data_url() {
        let url = svg_data_url("2@ABCDEF,xyz==,123==,456==").unwrap();
        let encoded = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        assert!(String::from_utf8(svg).unwrap().contains("<svg"));
    }

    #[test]
    fn test_terminal_qr_has_rows() {
        let art = terminal_qr("2@ABCDEF").unwrap();
        assert!(art.lines().count() > 10);
    }
}
