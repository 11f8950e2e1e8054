use crate::schema::{HardwareStageFields, PipelineFields, METADATA_MAJOR_VERSION};

/// First client interface version that no longer sees the legacy metadata fields.
pub const LEGACY_FIELDS_REMOVED_IN_CLIENT_INTERFACE: u32 = 619;

/// What to do with a fixed-capacity string that does not fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringOverflow {
    /// Fail the decode with [`crate::MetadataError::StringTooLong`].
    #[default]
    Reject,
    /// Keep the longest prefix that fits, cut on a UTF-8 character boundary.
    Truncate,
}

/// Runtime configuration shared by decode and encode.
///
/// Which fields are legal to read or write depends on the client interface version the caller
/// was built against, so it is passed in as data rather than selected at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// Blobs with a larger major version are rejected.
    pub supported_major_version: u32,
    pub client_interface_major_version: u32,
    pub string_overflow: StringOverflow,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            supported_major_version: METADATA_MAJOR_VERSION,
            client_interface_major_version: LEGACY_FIELDS_REMOVED_IN_CLIENT_INTERFACE,
            string_overflow: StringOverflow::Reject,
        }
    }
}

impl CodecOptions {
    /// Options for a client that still consumes the pre-619 fields.
    pub fn legacy() -> Self {
        Self {
            client_interface_major_version: LEGACY_FIELDS_REMOVED_IN_CLIENT_INTERFACE - 1,
            ..Self::default()
        }
    }

    pub fn legacy_fields(&self) -> bool {
        self.client_interface_major_version < LEGACY_FIELDS_REMOVED_IN_CLIENT_INTERFACE
    }

    /// Pipeline fields this configuration may read or write.
    pub fn pipeline_fields(&self) -> PipelineFields {
        if self.legacy_fields() {
            PipelineFields::all()
        } else {
            PipelineFields::all().difference(PipelineFields::LEGACY)
        }
    }

    /// Hardware stage fields this configuration may read or write.
    pub fn hardware_stage_fields(&self) -> HardwareStageFields {
        if self.legacy_fields() {
            HardwareStageFields::all()
        } else {
            HardwareStageFields::all().difference(HardwareStageFields::LEGACY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_fields_follow_client_interface() {
        let modern = CodecOptions::default();
        assert!(!modern.legacy_fields());
        assert!(!modern
            .pipeline_fields()
            .contains(PipelineFields::STREAM_OUT_TABLE_ADDRESS));
        assert!(modern.pipeline_fields().contains(PipelineFields::API));
        assert!(!modern
            .hardware_stage_fields()
            .contains(HardwareStageFields::MAX_PRIMS_PER_WAVE));

        let legacy = CodecOptions::legacy();
        assert!(legacy.legacy_fields());
        assert!(legacy
            .pipeline_fields()
            .contains(PipelineFields::INDIRECT_USER_DATA_TABLE_ADDRESSES));
        assert!(legacy
            .hardware_stage_fields()
            .contains(HardwareStageFields::MAX_PRIMS_PER_WAVE));
    }
}
