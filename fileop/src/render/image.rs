use crate::descriptor::{self, ENCODED_TOKEN};
use crate::operation::{FileOperation, OperationOutput, OperationRequest};
use crate::{Config, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use snafu::prelude::*;
use std::str::FromStr;
use tracing::instrument;

const OPERATION: &str = "html2image";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    #[default]
    Jpg,
    Jpeg,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg | Self::Jpeg => "image/jpeg",
        }
    }
}

/// The parameters of an html2image command.
///
/// `html2image/url/<encoded url>` followed by any of `croph`, `cropw`, `cropx`, `cropy`,
/// `height`, `width` and `quality` with a positive number, `format` with one of `png`, `jpg` or
/// `jpeg`, and `force` with `0` or `1`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Html2ImageDescriptor {
    pub url: String,
    pub crop_h: Option<u32>,
    pub crop_w: Option<u32>,
    pub crop_x: Option<u32>,
    pub crop_y: Option<u32>,
    pub format: ImageFormat,
    pub height: Option<u32>,

    /// 1 to 100
    pub quality: Option<u32>,
    pub width: Option<u32>,

    /// Render at exactly `width`, disabling the renderer's smart width
    pub force: bool,
}

impl Html2ImageDescriptor {
    /// Renderer arguments, ending with the page URL.  The output path goes after these.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let numeric = [
            ("--crop-h", self.crop_h),
            ("--crop-w", self.crop_w),
            ("--crop-x", self.crop_x),
            ("--crop-y", self.crop_y),
        ];
        for (flag, value) in numeric {
            if let Some(value) = value {
                args.extend([flag.to_string(), value.to_string()]);
            }
        }

        args.extend(["--format".to_string(), self.format.as_str().to_string()]);

        let numeric = [
            ("--quality", self.quality),
            ("--height", self.height),
            ("--width", self.width),
        ];
        for (flag, value) in numeric {
            if let Some(value) = value {
                args.extend([flag.to_string(), value.to_string()]);
            }
        }

        if self.force {
            args.push("--disable-smart-width".to_string());
        }

        args.push(self.url.clone());

        args
    }
}

impl FromStr for Html2ImageDescriptor {
    type Err = crate::FileOpError;

    fn from_str(cmd: &str) -> Result<Self, Self::Err> {
        static GRAMMAR: Lazy<Regex> = Lazy::new(|| {
            Regex::new(&format!(
                "^html2image/url/{ENCODED_TOKEN}(/croph/[0-9]+|/cropw/[0-9]+|/cropx/[0-9]+|/cropy/[0-9]+|/format/(png|jpg|jpeg)|/height/[0-9]+|/quality/[0-9]+|/width/[0-9]+|/force/[01]){{0,9}}$"
            ))
            .expect("BUG: invalid html2image grammar regex")
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

        let format = match descriptor::param(cmd, "format") {
            Some("png") => ImageFormat::Png,
            Some("jpeg") => ImageFormat::Jpeg,
            _ => ImageFormat::Jpg,
        };

        let quality = descriptor::positive_param(OPERATION, cmd, "quality")?;
        ensure!(
            quality.map_or(true, |quality| quality <= 100),
            crate::error::InvalidParameterSnafu {
                operation: OPERATION,
                name: "quality"
            }
        );

        Ok(Self {
            url,
            crop_h: descriptor::positive_param(OPERATION, cmd, "croph")?,
            crop_w: descriptor::positive_param(OPERATION, cmd, "cropw")?,
            crop_x: descriptor::positive_param(OPERATION, cmd, "cropx")?,
            crop_y: descriptor::positive_param(OPERATION, cmd, "cropy")?,
            format,
            height: descriptor::positive_param(OPERATION, cmd, "height")?,
            quality,
            width: descriptor::positive_param(OPERATION, cmd, "width")?,
            force: descriptor::flag_param(cmd, "force").unwrap_or(false),
        })
    }
}

/// The `html2image` file operation, rendering a web page to an image with `wkhtmltoimage`
#[derive(Clone, Debug)]
pub struct Html2Image {
    program: String,
    max_page_size: u64,
}

impl Html2Image {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.wkhtmltoimage_path.clone(),
            max_page_size: config.html2image_max_page_size,
        }
    }
}

#[async_trait::async_trait]
impl FileOperation for Html2Image {
    fn name(&self) -> &'static str {
        OPERATION
    }

    #[instrument(skip(self, request), fields(req_id = %request.req_id))]
    async fn run(&self, request: &OperationRequest) -> Result<OperationOutput> {
        let descriptor: Html2ImageDescriptor = request.cmd.parse()?;
        super::check_text_source(OPERATION, &request.src, self.max_page_size)?;

        let path = super::temp_output_path(OPERATION, &request.src.url, descriptor.format.as_str())?;
        super::run_renderer(&self.program, &descriptor.args(), &path).await?;

        Ok(OperationOutput::File {
            path,
            content_type: descriptor.format.content_type().to_string(),
        })
    }
}
