use crate::descriptor::{self, ENCODED_TOKEN};
use crate::operation::{FileOperation, OperationOutput, OperationRequest};
use crate::{Config, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use snafu::prelude::*;
use std::str::FromStr;
use tracing::instrument;

const OPERATION: &str = "html2pdf";

const CONTENT_TYPE: &str = "application/pdf";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portrait => "Portrait",
            Self::Landscape => "Landscape",
        }
    }
}

/// The parameters of an html2pdf command.
///
/// `html2pdf/url/<encoded url>` followed by any of `gray`, `low` and `collate` with `0` or `1`,
/// `orient` with `Portrait` or `Landscape`, `size` with a paper size `A0` to `B8`, `title` with
/// an encoded title, and `copies` with a positive number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Html2PdfDescriptor {
    pub url: String,
    pub gray: bool,
    pub low_quality: bool,
    pub orientation: Option<Orientation>,
    pub page_size: Option<String>,
    pub title: Option<String>,
    pub collate: bool,
    pub copies: u32,
}

impl Html2PdfDescriptor {
    fn new(url: String) -> Self {
        Self {
            url,
            gray: false,
            low_quality: false,
            orientation: None,
            page_size: None,
            title: None,
            collate: true,
            copies: 1,
        }
    }

    /// Renderer arguments, ending with the page URL.  The output path goes after these.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-q".to_string()];

        if self.gray {
            args.push("--grayscale".to_string());
        }
        if self.low_quality {
            args.push("--lowquality".to_string());
        }
        if let Some(orientation) = self.orientation {
            args.extend(["--orientation".to_string(), orientation.as_str().to_string()]);
        }
        if let Some(page_size) = &self.page_size {
            args.extend(["--page-size".to_string(), page_size.clone()]);
        }
        if let Some(title) = &self.title {
            args.extend(["--title".to_string(), title.clone()]);
        }

        args.push(if self.collate { "--collate" } else { "--no-collate" }.to_string());
        args.extend(["--copies".to_string(), self.copies.to_string()]);

        args.push(self.url.clone());

        args
    }
}

impl FromStr for Html2PdfDescriptor {
    type Err = crate::FileOpError;

    fn from_str(cmd: &str) -> Result<Self, Self::Err> {
        static GRAMMAR: Lazy<Regex> = Lazy::new(|| {
            Regex::new(&format!(
                "^html2pdf/url/{ENCODED_TOKEN}(/gray/[01]|/low/[01]|/orient/(Portrait|Landscape)|/size/[A-B][0-8]|/title/{ENCODED_TOKEN}|/collate/[01]|/copies/[0-9]+){{0,7}}$"
            ))
            .expect("BUG: invalid html2pdf grammar regex")
        });

        ensure!(
            GRAMMAR.is_match(cmd),
            crate::error::InvalidDescriptorSnafu {
                operation: OPERATION,
                cmd
            }
        );

        let url = descriptor::decoded_param(OPERATION, cmd, "url")?
            .expect("BUG: grammar requires a url");

        let mut parsed = Self::new(url);
        parsed.gray = descriptor::flag_param(cmd, "gray").unwrap_or(false);
        parsed.low_quality = descriptor::flag_param(cmd, "low").unwrap_or(false);
        parsed.orientation = match descriptor::param(cmd, "orient") {
            Some("Portrait") => Some(Orientation::Portrait),
            Some("Landscape") => Some(Orientation::Landscape),
            _ => None,
        };
        parsed.page_size = descriptor::param(cmd, "size").map(str::to_string);
        parsed.title = descriptor::decoded_param(OPERATION, cmd, "title")?;
        parsed.collate = descriptor::flag_param(cmd, "collate").unwrap_or(true);
        if let Some(copies) = descriptor::positive_param(OPERATION, cmd, "copies")? {
            parsed.copies = copies;
        }

        Ok(parsed)
    }
}

/// The `html2pdf` file operation, rendering a web page to a PDF with `wkhtmltopdf`
#[derive(Clone, Debug)]
pub struct Html2Pdf {
    program: String,
    max_page_size: u64,
    max_copies: u32,
}

impl Html2Pdf {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.wkhtmltopdf_path.clone(),
            max_page_size: config.html2pdf_max_page_size,
            max_copies: config.html2pdf_max_copies,
        }
    }
}

#[async_trait::async_trait]
impl FileOperation for Html2Pdf {
    fn name(&self) -> &'static str {
        OPERATION
    }

    #[instrument(skip(self, request), fields(req_id = %request.req_id))]
    async fn run(&self, request: &OperationRequest) -> Result<OperationOutput> {
        let descriptor: Html2PdfDescriptor = request.cmd.parse()?;
        super::check_text_source(OPERATION, &request.src, self.max_page_size)?;

        ensure!(
            descriptor.copies <= self.max_copies,
            crate::error::TooManyCopiesSnafu {
                copies: descriptor.copies,
                limit: self.max_copies
            }
        );

        let path = super::temp_output_path(OPERATION, &request.src.url, "pdf")?;
        super::run_renderer(&self.program, &descriptor.args(), &path).await?;

        Ok(OperationOutput::File {
            path,
            content_type: CONTENT_TYPE.to_string(),
        })
    }
}
