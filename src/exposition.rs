// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Exposition format framing
//!
//! The policy output is already metric text; what remains is choosing between
//! the legacy Prometheus text format and OpenMetrics (which ends in `# EOF`)
//! based on the media type the scraper declared.

use crate::policy::EvaluationOutput;

const OPENMETRICS_MEDIA_TYPE: &str = "application/openmetrics-text";

const EOF_MARKER: &str = "# EOF\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpositionFormat {
    /// `text/plain; version=0.0.4`
    #[default]
    PlainText,
    /// `application/openmetrics-text; version=1.0.0`
    OpenMetrics,
}

impl ExpositionFormat {
    /// Pick the format from the request's Content-Type header.
    ///
    /// Only an explicit OpenMetrics media type selects OpenMetrics; a missing,
    /// unparsable or any other header gets plain text.
    pub fn negotiate(content_type: Option<&str>) -> Self {
        let Some(header) = content_type else {
            return Self::PlainText;
        };
        let media_type = header.split(';').next().unwrap_or_default().trim();
        if media_type.eq_ignore_ascii_case(OPENMETRICS_MEDIA_TYPE) {
            Self::OpenMetrics
        } else {
            Self::PlainText
        }
    }

    /// Content-Type of the response
    pub fn content_type(self) -> &'static str {
        match self {
            Self::PlainText => "text/plain; version=0.0.4; charset=utf-8",
            Self::OpenMetrics => "application/openmetrics-text; version=1.0.0; charset=utf-8",
        }
    }

    /// Response body for a successful evaluation
    pub fn render(self, output: &EvaluationOutput) -> String {
        let mut body = output.to_text();
        if self == Self::OpenMetrics {
            body.push_str(EOF_MARKER);
        }
        body
    }
}
