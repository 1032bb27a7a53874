//! Asset-upload collaborator boundary.
//!
//! The upload itself belongs to an external service; the pipeline only
//! consumes the stable URL it returns and carries it on the user message as
//! an uploaded-attachment reference.

use crate::types::UploadedAttachment;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    async fn upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<UploadedAttachment>;
}
