//! IFF container used for save files: `FORM <len> IFZS` followed by
//! chunks of `id[4] len[4] data`, each padded to an even length.

use crate::error::SnapshotError;

pub const FORM: [u8; 4] = *b"FORM";
pub const IFZS: [u8; 4] = *b"IFZS";

/// Chunk ids written by this crate.
pub mod id {
    pub const HEADER: [u8; 4] = *b"IFhd";
    pub const MEMORY: [u8; 4] = *b"CMem";
    pub const HEAP: [u8; 4] = *b"MAll";
    pub const STACK: [u8; 4] = *b"Stks";
    pub const SESSION: [u8; 4] = *b"VMst";
}

#[derive(Debug, Default)]
pub struct FormWriter {
    body: Vec<u8>,
}

impl FormWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk(&mut self, id: [u8; 4], data: &[u8]) -> &mut Self {
        self.body.extend_from_slice(&id);
        self.body
            .extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.body.extend_from_slice(data);
        if data.len() % 2 == 1 {
            self.body.push(0);
        }
        self
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 12);
        out.extend_from_slice(&FORM);
        out.extend_from_slice(&(self.body.len() as u32 + 4).to_be_bytes());
        out.extend_from_slice(&IFZS);
        out.extend_from_slice(&self.body);
        out
    }
}

/// Parsed chunk list borrowing from the file bytes.
#[derive(Debug)]
pub struct Form<'a> {
    chunks: Vec<([u8; 4], &'a [u8])>,
}

impl<'a> Form<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, SnapshotError> {
        if data.len() < 12 || data[0..4] != FORM || data[8..12] != IFZS {
            return Err(SnapshotError::NotASaveFile);
        }
        let form_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        if form_len < 4 || form_len > data.len() - 8 {
            return Err(SnapshotError::Truncated);
        }
        let end = 8 + form_len;
        let mut chunks = Vec::new();
        let mut pos = 12;
        while pos < end {
            if pos + 8 > end {
                return Err(SnapshotError::Truncated);
            }
            let mut id = [0u8; 4];
            id.copy_from_slice(&data[pos..pos + 4]);
            let len =
                u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
                    as usize;
            let body = pos + 8;
            if len > end - body {
                return Err(SnapshotError::Truncated);
            }
            chunks.push((id, &data[body..body + len]));
            pos = body + len + (len & 1);
        }
        Ok(Self { chunks })
    }

    /// First chunk with the given id.
    pub fn chunk(&self, id: [u8; 4]) -> Option<&'a [u8]> {
        self.chunks
            .iter()
            .find(|(chunk_id, _)| *chunk_id == id)
            .map(|&(_, body)| body)
    }

    pub fn ids(&self) -> impl Iterator<Item = [u8; 4]> + '_ {
        self.chunks.iter().map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn odd_chunks_are_padded() {
        let mut writer = FormWriter::new();
        writer.chunk(id::HEADER, &[1, 2, 3]).chunk(id::HEAP, &[]);
        let bytes = writer.finish();
        assert_eq!(&bytes[0..4], b"FORM");
        assert_eq!(u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 4 + 12 + 8);
        assert_eq!(bytes.len(), 8 + 24);

        let form = Form::parse(&bytes).unwrap();
        assert_eq!(form.chunk(id::HEADER), Some(&[1u8, 2, 3][..]));
        assert_eq!(form.chunk(id::HEAP), Some(&[][..]));
        assert_eq!(form.chunk(id::STACK), None);
    }

    #[test]
    fn unknown_chunks_are_skipped() {
        let mut writer = FormWriter::new();
        writer.chunk(*b"XtrA", &[9; 5]).chunk(id::MEMORY, &[4, 4]);
        let bytes = writer.finish();
        let form = Form::parse(&bytes).unwrap();
        assert_eq!(form.chunk(id::MEMORY), Some(&[4u8, 4][..]));
        assert_eq!(form.ids().count(), 2);
    }

    #[test]
    fn damaged_files() {
        assert_eq!(Form::parse(b"FORM").unwrap_err(), SnapshotError::NotASaveFile);
        assert_eq!(
            Form::parse(b"FORM\0\0\0\x04IFZX").unwrap_err(),
            SnapshotError::NotASaveFile
        );
        let mut writer = FormWriter::new();
        writer.chunk(id::MEMORY, &[1, 2, 3, 4]);
        let mut bytes = writer.finish();
        bytes.truncate(bytes.len() - 1);
        assert_eq!(Form::parse(&bytes).unwrap_err(), SnapshotError::Truncated);
    }
}
