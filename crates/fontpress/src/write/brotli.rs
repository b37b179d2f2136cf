//! Brotli compression of WOFF2 table data.

use std::mem;

use super::FontWriter;
use crate::{errors::RebuildErrorKind, RebuildError, TableTag};

/// Streams table data in the order of table records, skipping the 4-byte alignment padding.
/// WOFF2 stores tables unpadded.
struct UnpaddedTables<'a> {
    tables: Vec<&'a [u8]>,
    table_idx: usize,
    pos_in_table: usize,
}

impl<'a> UnpaddedTables<'a> {
    fn new(writer: &'a FontWriter) -> Self {
        let base_offset = writer.tables.first().map_or(0, |record| record.offset) as usize;
        let tables = writer.tables.iter().map(|record| {
            let start = record.offset as usize - base_offset;
            &writer.table_data[start..start + record.length as usize]
        });
        Self {
            tables: tables.collect(),
            table_idx: 0,
            pos_in_table: 0,
        }
    }
}

impl brotli::CustomRead<()> for UnpaddedTables<'_> {
    fn read(&mut self, mut data: &mut [u8]) -> Result<usize, ()> {
        let mut total_read = 0;
        while !data.is_empty() {
            let Some(table) = self.tables.get(self.table_idx) else {
                break;
            };
            let remaining = &table[self.pos_in_table..];
            let chunk_len = remaining.len().min(data.len());
            let (head, tail) = mem::take(&mut data).split_at_mut(chunk_len);
            head.copy_from_slice(&remaining[..chunk_len]);
            data = tail;
            total_read += chunk_len;

            self.pos_in_table += chunk_len;
            if self.pos_in_table == table.len() {
                self.table_idx += 1;
                self.pos_in_table = 0;
            }
        }
        Ok(total_read)
    }
}

#[derive(Default)]
struct Output(Vec<u8>);

impl brotli::CustomWrite<()> for Output {
    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        self.0.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct BoxedSlice<T>(Box<[T]>);

impl<T> Default for BoxedSlice<T> {
    fn default() -> Self {
        Self(Box::default())
    }
}

impl<T> brotli::SliceWrapper<T> for BoxedSlice<T> {
    fn slice(&self) -> &[T] {
        &self.0
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

impl<T> brotli::SliceWrapperMut<T> for BoxedSlice<T> {
    fn slice_mut(&mut self) -> &mut [T] {
        &mut self.0
    }
}

/// Heap allocator for the encoder (the crate is used without its `std` feature).
#[derive(Debug)]
struct HeapAlloc;

impl<T: Clone + Default> brotli::enc::Allocator<T> for HeapAlloc {
    type AllocatedMemory = BoxedSlice<T>;

    fn alloc_cell(&mut self, len: usize) -> Self::AllocatedMemory {
        BoxedSlice(vec![T::default(); len].into())
    }

    fn free_cell(&mut self, data: Self::AllocatedMemory) {
        drop(data);
    }
}

impl brotli::enc::BrotliAlloc for HeapAlloc {}

impl FontWriter {
    /// Compresses table data with the default (maximum) quality.
    pub(super) fn compress_data(&self) -> Result<Vec<u8>, RebuildError> {
        let params = brotli::enc::BrotliEncoderParams::default();
        let mut output = Output::default();
        brotli::BrotliCompressCustomIo(
            &mut UnpaddedTables::new(self),
            &mut output,
            &mut [0_u8; 4_096],
            &mut [0_u8; 4_096],
            &params,
            HeapAlloc,
            &mut |_, _, _, _| { /* no metablock callbacks */ },
            (),
        )
        // Compression covers all tables; the error is reported against `head`
        .map_err(|()| RebuildError::new(TableTag::HEAD, RebuildErrorKind::Compression))?;

        log::debug!(
            "compressed {} bytes of table data into {} bytes",
            self.table_data.len(),
            output.0.len()
        );
        Ok(output.0)
    }
}

#[cfg(test)]
mod tests {
    use brotli::CustomRead;
    use test_casing::test_casing;

    use super::*;
    use crate::tests::{TestCharSubset, TestFont};
    use crate::{Font, FontSubset, SubsetOptions};

    #[test_casing(5, [1, 3, 64, 1_000, 100_000])]
    fn unpadded_tables_are_streamed_in_chunks(chunk_size: usize) {
        let font_bytes = TestFont::Latin.bytes();
        let font = Font::new(&font_bytes).unwrap();
        let chars = TestCharSubset::Ascii.into_set();
        let writer = FontSubset::new(font, &chars, SubsetOptions::default())
            .unwrap()
            .rebuild()
            .unwrap();

        let mut reader = UnpaddedTables::new(&writer);
        let mut buffer = vec![0; 100_000];
        let read = buffer
            .chunks_mut(chunk_size)
            .map(|chunk| reader.read(chunk).unwrap())
            .sum::<usize>();
        let expected_read = writer
            .tables
            .iter()
            .map(|record| record.length as usize)
            .sum::<usize>();
        assert_eq!(read, expected_read);
        assert_eq!(reader.read(&mut [0; 16]).unwrap(), 0);

        let mut pos = 0;
        for record in &writer.tables {
            let offset = record.offset as usize;
            let len = record.length as usize;
            assert_eq!(
                writer.table_data[offset..offset + len],
                buffer[pos..pos + len],
                "{}",
                record.tag
            );
            pos += len;
        }
    }
}
