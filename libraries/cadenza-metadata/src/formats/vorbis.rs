//! Vorbis comment blocks, shared by Ogg Vorbis, Ogg Opus and FLAC
use crate::bytes::ByteReader;
use crate::error::{MetadataError, Result};
use cadenza_core::{is_valid_tag_name, TagMap};
use tracing::debug;

/// Comment keys that carry binary payloads and never surface as tags
const BINARY_KEYS: &[&str] = &["metadata_block_picture", "coverart", "coverartmime"];

/// A decoded comment block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VorbisComments {
    pub vendor: String,
    pub tags: TagMap,
    /// Raw `KEY=value` comments kept verbatim on rewrite
    pub preserved: Vec<Vec<u8>>,
}

impl VorbisComments {
    /// Decode a comment block without any container framing
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let vendor_len = reader.u32_le()? as usize;
        let vendor = String::from_utf8_lossy(reader.bytes(vendor_len)?).into_owned();
        let count = reader.u32_le()?;

        let mut comments = Self {
            vendor,
            ..Self::default()
        };
        for _ in 0..count {
            let len = reader.u32_le()? as usize;
            let raw = reader.bytes(len)?;
            let Some(split) = raw.iter().position(|&b| b == b'=') else {
                debug!("Skipping Vorbis comment without '='");
                continue;
            };
            let key = String::from_utf8_lossy(&raw[..split]).to_ascii_lowercase();
            if !is_valid_tag_name(&key) || BINARY_KEYS.contains(&key.as_str()) {
                comments.preserved.push(raw.to_vec());
                continue;
            }
            comments
                .tags
                .push(&key, String::from_utf8_lossy(&raw[split + 1..]).into_owned());
        }
        Ok(comments)
    }

    /// Encode the block: vendor, then one comment per value, then the
    /// preserved comments
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut comments: Vec<Vec<u8>> = Vec::new();
        for (key, values) in self.tags.iter_present() {
            for value in values {
                let mut comment = key.to_ascii_uppercase().into_bytes();
                comment.push(b'=');
                comment.extend_from_slice(value.as_bytes());
                comments.push(comment);
            }
        }
        comments.extend(self.preserved.iter().cloned());

        let mut out = Vec::new();
        push_len(&mut out, self.vendor.len())?;
        out.extend_from_slice(self.vendor.as_bytes());
        push_len(&mut out, comments.len())?;
        for comment in comments {
            push_len(&mut out, comment.len())?;
            out.extend(comment);
        }
        Ok(out)
    }

    /// Same vendor and preserved comments, new tags
    pub fn with_tags(&self, tags: &TagMap) -> Self {
        Self {
            vendor: self.vendor.clone(),
            tags: tags.clone(),
            preserved: self.preserved.clone(),
        }
    }
}

fn push_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| MetadataError::InvalidValue {
        field: "vorbis comment".to_string(),
        value: format!("{} bytes", len),
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}
