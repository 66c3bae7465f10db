//! # dipeo-diagram - diagram format strategies
//!
//! Importers and exporters for the three surface syntaxes (native JSON,
//! light YAML, readable YAML), format auto-detection, and the on-disk
//! executable format. Every strategy deserializes to the same
//! [`dipeo_domain::DomainDiagram`].

pub mod error;
pub mod executable_format;
pub mod light;
pub mod native;
pub mod readable;
pub mod strategy;

pub use error::{DiagramError, Result};
pub use executable_format::{
    deserialize_to_executable, is_executable_format, serialize_executable,
};
pub use light::LightStrategy;
pub use native::NativeStrategy;
pub use readable::ReadableStrategy;
pub use strategy::{DiagramFormat, FormatStrategy};

use dipeo_domain::DomainDiagram;

fn strategies() -> [&'static dyn FormatStrategy; 3] {
    [&ReadableStrategy, &LightStrategy, &NativeStrategy]
}

fn strategy_for(format: DiagramFormat) -> &'static dyn FormatStrategy {
    match format {
        DiagramFormat::Native => &NativeStrategy,
        DiagramFormat::Light => &LightStrategy,
        DiagramFormat::Readable => &ReadableStrategy,
    }
}

/// Detect the format of raw content: quick-match by telltale tokens
/// first, then parse-and-score with the highest confidence above 0.5
/// winning.
pub fn detect_format(content: &str) -> Option<DiagramFormat> {
    for strategy in strategies() {
        if strategy.quick_match(content) {
            return Some(strategy.format());
        }
    }

    let mut best: Option<(DiagramFormat, f32)> = None;
    for strategy in strategies() {
        let confidence = strategy.detect_confidence(content);
        if confidence > 0.5 && best.map(|(_, c)| confidence > c).unwrap_or(true) {
            best = Some((strategy.format(), confidence));
        }
    }
    best.map(|(format, _)| format)
}

/// Parse content into a domain diagram. An explicit format name skips
/// detection; `path` is recorded as the diagram's source for
/// prompt-file resolution.
pub fn deserialize_to_domain(
    content: &str,
    format: Option<&str>,
    path: Option<&str>,
) -> Result<DomainDiagram> {
    let format = match format {
        Some(name) => name.parse()?,
        None => detect_format(content).ok_or(DiagramError::UnknownFormat)?,
    };
    tracing::debug!(format = %format, "parsing diagram");
    strategy_for(format).deserialize_to_domain(content, path)
}

/// Serialize a domain diagram in the given format.
pub fn serialize_from_domain(diagram: &DomainDiagram, format: DiagramFormat) -> Result<String> {
    strategy_for(format).serialize_from_domain(diagram)
}
