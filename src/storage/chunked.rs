/// A scatter/gather byte buffer.
///
/// The buffer is an ordered sequence of chunks. The first chunk may carry
/// reserved headroom so that link-layer headers and VLAN tags can be
/// prepended without moving the payload; the checksum and CRC routines
/// walk the chunks through [NetBuffer::chunks] without materializing a
/// contiguous copy.
#[derive(Debug, Clone, Default)]
pub struct NetBuffer {
    chunks: Vec<Vec<u8>>,
    /// Unused bytes at the front of the first chunk.
    headroom: usize,
}

impl NetBuffer {
    /// Create an empty buffer with no headroom.
    pub fn new() -> NetBuffer {
        NetBuffer::default()
    }

    /// Create an empty buffer whose first `headroom` bytes are reserved
    /// for headers prepended later with [NetBuffer::prepend].
    pub fn with_headroom(headroom: usize) -> NetBuffer {
        NetBuffer {
            chunks: vec![vec![0; headroom]],
            headroom,
        }
    }

    /// Remaining reserved space at the front of the buffer.
    pub fn headroom(&self) -> usize {
        self.headroom
    }

    /// Total payload length, headroom excluded.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum::<usize>() - self.headroom
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim `length` bytes of headroom and return them for writing.
    ///
    /// Panics if the remaining headroom is smaller than `length`; callers
    /// size the headroom at allocation time.
    pub fn prepend(&mut self, length: usize) -> &mut [u8] {
        assert!(length <= self.headroom, "prepend past reserved headroom");
        self.headroom -= length;
        &mut self.chunks[0][self.headroom..self.headroom + length]
    }

    /// Append bytes, copying them into the last chunk's spare capacity or
    /// a new chunk.
    pub fn append_slice(&mut self, data: &[u8]) {
        match self.chunks.last_mut() {
            Some(last) if last.capacity() - last.len() >= data.len() => {
                last.extend_from_slice(data)
            }
            _ => self.chunks.push(data.to_vec()),
        }
    }

    /// Append an owned chunk without copying it.
    pub fn append_chunk(&mut self, chunk: Vec<u8>) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    /// Chain `length` bytes of `other`, starting at `offset`, onto the end
    /// of this buffer. Whole chunks are moved, not copied; only the
    /// partial chunks at the edges of the range are copied.
    pub fn concat(&mut self, other: NetBuffer, offset: usize, length: usize) {
        assert!(offset + length <= other.len(), "concat range out of bounds");
        let mut skip = offset + other.headroom;
        let mut remaining = length;
        for chunk in other.chunks {
            if remaining == 0 {
                break;
            }
            if skip >= chunk.len() {
                skip -= chunk.len();
                continue;
            }
            let take = (chunk.len() - skip).min(remaining);
            if skip == 0 && take == chunk.len() {
                self.chunks.push(chunk);
            } else {
                self.chunks.push(chunk[skip..skip + take].to_vec());
            }
            skip = 0;
            remaining -= take;
        }
    }

    fn locate(&self, mut offset: usize) -> (usize, usize) {
        offset += self.headroom;
        for (index, chunk) in self.chunks.iter().enumerate() {
            if offset < chunk.len() {
                return (index, offset);
            }
            offset -= chunk.len();
        }
        (self.chunks.len(), 0)
    }

    /// Read bytes starting at `offset` into `data`; returns the number of
    /// bytes read.
    pub fn read_at(&self, offset: usize, data: &mut [u8]) -> usize {
        let mut copied = 0;
        let (mut index, mut skip) = self.locate(offset);
        while copied < data.len() && index < self.chunks.len() {
            let chunk = &self.chunks[index][skip..];
            let take = chunk.len().min(data.len() - copied);
            data[copied..copied + take].copy_from_slice(&chunk[..take]);
            copied += take;
            skip = 0;
            index += 1;
        }
        copied
    }

    /// Overwrite bytes starting at `offset` with `data`; returns the
    /// number of bytes written.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> usize {
        let mut copied = 0;
        let (mut index, mut skip) = self.locate(offset);
        while copied < data.len() && index < self.chunks.len() {
            let chunk = &mut self.chunks[index][skip..];
            let take = chunk.len().min(data.len() - copied);
            chunk[..take].copy_from_slice(&data[copied..copied + take]);
            copied += take;
            skip = 0;
            index += 1;
        }
        copied
    }

    /// Copy `length` bytes from `src` at `src_offset` into this buffer at
    /// `dst_offset`. Both ranges must lie within the buffers.
    pub fn copy_range(
        &mut self,
        dst_offset: usize,
        src: &NetBuffer,
        src_offset: usize,
        length: usize,
    ) {
        let mut tmp = vec![0; length];
        let read = src.read_at(src_offset, &mut tmp);
        assert_eq!(read, length, "copy_range source out of bounds");
        let written = self.write_at(dst_offset, &tmp);
        assert_eq!(written, length, "copy_range destination out of bounds");
    }

    /// A contiguous view at `offset`, as long as the requested `length`
    /// lies within a single chunk.
    pub fn at(&self, offset: usize, length: usize) -> Option<&[u8]> {
        let (index, skip) = self.locate(offset);
        let chunk = self.chunks.get(index)?;
        if chunk.len() - skip >= length {
            Some(&chunk[skip..skip + length])
        } else {
            None
        }
    }

    /// Iterate the chunk slices covering `[offset, offset + length)`.
    ///
    /// Checksum and CRC walks are folds over this iterator; nothing is
    /// allocated.
    pub fn chunks(&self, offset: usize, length: usize) -> impl Iterator<Item = &[u8]> {
        let (index, skip) = self.locate(offset);
        let mut remaining = length.min(self.len().saturating_sub(offset));
        let mut first_skip = skip;
        self.chunks[index.min(self.chunks.len())..]
            .iter()
            .map_while(move |chunk| {
                if remaining == 0 {
                    return None;
                }
                let skip = core::mem::take(&mut first_skip);
                if skip >= chunk.len() {
                    return Some(&chunk[0..0]);
                }
                let take = (chunk.len() - skip).min(remaining);
                remaining -= take;
                Some(&chunk[skip..skip + take])
            })
    }

    /// Flatten the buffer into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        let mut headroom = self.headroom;
        for chunk in &self.chunks {
            if headroom >= chunk.len() {
                headroom -= chunk.len();
                continue;
            }
            out.extend_from_slice(&chunk[headroom..]);
            headroom = 0;
        }
        out
    }
}

impl From<&[u8]> for NetBuffer {
    fn from(data: &[u8]) -> NetBuffer {
        let mut buffer = NetBuffer::new();
        buffer.append_slice(data);
        buffer
    }
}

impl From<Vec<u8>> for NetBuffer {
    fn from(chunk: Vec<u8>) -> NetBuffer {
        let mut buffer = NetBuffer::new();
        buffer.append_chunk(chunk);
        buffer
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prepend_into_headroom() {
        let mut buffer = NetBuffer::with_headroom(18);
        buffer.append_slice(b"payload");
        assert_eq!(buffer.len(), 7);

        buffer.prepend(14).copy_from_slice(b"ethernet-hdr..");
        assert_eq!(buffer.headroom(), 4);
        assert_eq!(buffer.len(), 21);
        assert_eq!(buffer.to_vec(), b"ethernet-hdr..payload");

        // remaining headroom still takes one VLAN tag
        buffer.prepend(4).copy_from_slice(b"tag!");
        assert_eq!(buffer.headroom(), 0);
        assert_eq!(buffer.to_vec(), b"tag!ethernet-hdr..payload");
    }

    #[test]
    #[should_panic(expected = "prepend past reserved headroom")]
    fn prepend_beyond_headroom() {
        let mut buffer = NetBuffer::with_headroom(2);
        buffer.prepend(4);
    }

    #[test]
    fn read_write_across_chunks() {
        let mut buffer = NetBuffer::new();
        buffer.append_chunk(b"abcd".to_vec());
        buffer.append_chunk(b"efgh".to_vec());
        buffer.append_chunk(b"ij".to_vec());
        assert_eq!(buffer.len(), 10);

        let mut data = [0; 6];
        assert_eq!(buffer.read_at(2, &mut data), 6);
        assert_eq!(&data, b"cdefgh");
        // short read at the tail
        assert_eq!(buffer.read_at(8, &mut data), 2);

        assert_eq!(buffer.write_at(3, b"XYZ"), 3);
        assert_eq!(buffer.to_vec(), b"abcXYZghij");
    }

    #[test]
    fn concat_moves_whole_chunks() {
        let mut head = NetBuffer::new();
        head.append_slice(b"head");

        let mut tail = NetBuffer::new();
        tail.append_chunk(b"0123".to_vec());
        tail.append_chunk(b"4567".to_vec());

        // skip one byte into the first chunk, stop one byte short
        head.concat(tail, 1, 6);
        assert_eq!(head.to_vec(), b"head123456");
    }

    #[test]
    fn contiguous_view() {
        let mut buffer = NetBuffer::new();
        buffer.append_chunk(b"abcd".to_vec());
        buffer.append_chunk(b"efgh".to_vec());
        assert_eq!(buffer.at(1, 3), Some(&b"bcd"[..]));
        // range straddles a chunk boundary
        assert_eq!(buffer.at(2, 4), None);
        assert_eq!(buffer.at(4, 4), Some(&b"efgh"[..]));
    }

    #[test]
    fn chunk_walk() {
        let mut buffer = NetBuffer::with_headroom(2);
        buffer.append_slice(b"ab");
        buffer.append_chunk(b"cdef".to_vec());
        buffer.append_chunk(b"gh".to_vec());

        let walked: Vec<&[u8]> = buffer.chunks(1, 6).collect();
        let total: usize = walked.iter().map(|chunk| chunk.len()).sum();
        assert_eq!(total, 6);
        let flat: Vec<u8> = walked.concat();
        assert_eq!(flat, b"bcdefg");
    }

    #[test]
    fn copy_range_between_buffers() {
        let src = NetBuffer::from(&b"0123456789"[..]);
        let mut dst = NetBuffer::from(vec![0u8; 8]);
        dst.copy_range(2, &src, 4, 4);
        assert_eq!(dst.to_vec(), &[0, 0, b'4', b'5', b'6', b'7', 0, 0]);
    }
}
