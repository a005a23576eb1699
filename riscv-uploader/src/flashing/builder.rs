//! Bucketing of firmware segments into device pages.
//!
//! Both flash paths program fixed-size pages, so arbitrary address-tagged
//! byte runs have to be cut into page-aligned buffers first. The transform
//! is pure: no I/O, deterministic, idempotent.

use std::collections::{BTreeMap, BTreeSet};

use riscv_uploader_target::MemoryType;

use super::loader::Segment;

/// Firmware bytes of one memory, bucketed into fixed-size pages.
///
/// Pages are keyed by their page-aligned offset *inside* the memory
/// section. Bytes not covered by any segment stay zero inside a page that
/// is otherwise touched; untouched pages do not exist.
#[derive(Debug, Clone)]
pub struct PageMap {
    page_size: u32,
    pages: BTreeMap<u32, Vec<u8>>,
}

impl PageMap {
    /// An empty map with the given page size.
    pub fn new(page_size: u32) -> Self {
        PageMap {
            page_size,
            pages: BTreeMap::new(),
        }
    }

    /// Bucket every segment resolved into `memory` into pages of
    /// `page_size` bytes.
    pub fn build(segments: &[Segment], memory: MemoryType, page_size: u32) -> Self {
        let mut map = PageMap::new(page_size);

        for segment in segments {
            let Some(section) = segment.memory else {
                continue;
            };
            if section.ty != memory {
                continue;
            }

            map.add_bytes(segment.offset - section.offset, &segment.data);
        }

        map
    }

    /// Write a run of bytes at an offset inside the memory, allocating
    /// zero-filled pages on first touch.
    pub fn add_bytes(&mut self, internal_offset: u32, data: &[u8]) {
        for (index, &byte) in data.iter().enumerate() {
            let offset = internal_offset + index as u32;
            let page_offset = offset - offset % self.page_size;

            let page = self
                .pages
                .entry(page_offset)
                .or_insert_with(|| vec![0; self.page_size as usize]);
            page[(offset - page_offset) as usize] = byte;
        }
    }

    /// The configured page size in bytes.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of touched pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether no page was touched.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Total payload in bytes.
    pub fn byte_len(&self) -> usize {
        self.pages.len() * self.page_size as usize
    }

    /// The touched pages in ascending offset order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.pages
            .iter()
            .map(|(&offset, page)| (offset, page.as_slice()))
    }

    /// The page at the given page-aligned offset, if touched.
    pub fn page(&self, offset: u32) -> Option<&[u8]> {
        self.pages.get(&offset).map(Vec::as_slice)
    }

    /// The minimal, sorted set of sector-aligned addresses covering every
    /// touched page.
    pub fn sectors(&self, sector_size: u32) -> Vec<u32> {
        let sectors: BTreeSet<u32> = self
            .pages
            .keys()
            .map(|offset| offset & !(sector_size - 1))
            .collect();
        sectors.into_iter().collect()
    }

    /// All touched pages flattened into one contiguous buffer starting at
    /// offset zero, with gaps zero-filled.
    pub fn combined(&self) -> Vec<u8> {
        let Some((&last_offset, _)) = self.pages.iter().next_back() else {
            return Vec::new();
        };

        let mut combined = vec![0u8; (last_offset + self.page_size) as usize];
        for (offset, page) in self.iter() {
            combined[offset as usize..offset as usize + page.len()].copy_from_slice(page);
        }
        combined
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use riscv_uploader_target::{MemorySection, MemoryType};
    use test_case::test_case;

    use super::*;

    fn spifi_section() -> MemorySection {
        MemorySection {
            ty: MemoryType::Spifi,
            offset: 0x8000_0000,
            length: 16 * 1024 * 1024,
        }
    }

    fn segment(offset: u32, data: Vec<u8>) -> Segment {
        Segment {
            offset,
            data,
            memory: Some(spifi_section()),
        }
    }

    #[test]
    fn paging_round_trip_reproduces_every_byte() {
        let data: Vec<u8> = (0..=255).cycle().take(700).map(|b| b as u8).collect();
        let segments = vec![
            segment(0x8000_0000 + 10, data[..300].to_vec()),
            segment(0x8000_0000 + 1000, data[300..].to_vec()),
        ];

        let pages = PageMap::build(&segments, MemoryType::Spifi, 256);

        for segment in &segments {
            let internal = segment.offset - 0x8000_0000;
            for (index, &expected) in segment.data.iter().enumerate() {
                let offset = internal + index as u32;
                let page_offset = offset & !255;
                let page = pages.page(page_offset).unwrap();
                assert_eq!(page[(offset - page_offset) as usize], expected);
            }
        }
    }

    #[test_case(128; "eeprom page size")]
    #[test_case(256; "flash page size")]
    fn untouched_bytes_of_a_touched_page_are_zero(page_size: u32) {
        let segments = vec![segment(0x8000_0000 + 4, vec![0xFF; 8])];
        let pages = PageMap::build(&segments, MemoryType::Spifi, page_size);

        let page = pages.page(0).unwrap();
        assert_eq!(page.len(), page_size as usize);
        assert_eq!(&page[..4], &[0, 0, 0, 0]);
        assert_eq!(&page[4..12], &[0xFF; 8]);
        assert!(page[12..].iter().all(|&b| b == 0));
    }

    #[test]
    fn a_300_byte_segment_becomes_two_pages() {
        let segments = vec![segment(0x8000_0000, vec![0xAB; 300])];
        let pages = PageMap::build(&segments, MemoryType::Spifi, 256);

        assert_eq!(pages.len(), 2);
        assert_eq!(pages.page(0).unwrap(), &[0xAB; 256][..]);

        let second = pages.page(256).unwrap();
        assert_eq!(&second[..44], &[0xAB; 44][..]);
        assert!(second[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn segments_of_other_memories_are_ignored() {
        let mut ram_segment = segment(0x0200_0000, vec![1, 2, 3]);
        ram_segment.memory = Some(MemorySection {
            ty: MemoryType::Ram,
            offset: 0x0200_0000,
            length: 16 * 1024,
        });

        let pages = PageMap::build(&[ram_segment], MemoryType::Spifi, 256);
        assert!(pages.is_empty());
    }

    #[test]
    fn sector_set_is_deduplicated_and_sorted() {
        let segments = vec![
            // Pages in sector 0x3000, 0x0000 and 0x1000, out of order,
            // several pages per sector.
            segment(0x8000_3100, vec![1; 600]),
            segment(0x8000_0000, vec![2; 16]),
            segment(0x8000_0F00, vec![3; 16]),
            segment(0x8000_1800, vec![4; 16]),
        ];

        let pages = PageMap::build(&segments, MemoryType::Spifi, 256);
        assert_eq!(pages.sectors(4096), vec![0x0000, 0x1000, 0x3000]);
    }

    #[test]
    fn combined_buffer_zero_fills_gaps() {
        let mut pages = PageMap::new(128);
        pages.add_bytes(0, &[0x11; 128]);
        pages.add_bytes(256, &[0x22; 4]);

        let combined = pages.combined();
        assert_eq!(combined.len(), 384);
        assert_eq!(&combined[..128], &[0x11; 128][..]);
        assert!(combined[128..256].iter().all(|&b| b == 0));
        assert_eq!(&combined[256..260], &[0x22; 4][..]);
    }
}
