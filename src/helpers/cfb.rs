//! OLE Compound File Binary (CFB) container used by legacy `.xls` workbooks.
//!
//! The whole container is held in memory: the stream handed to the reader is consumed
//! once and dropped by the caller, so nothing here keeps a handle on the source.

use crate::error::IngestError;
use crate::helpers::bytes::to_u16;
use crate::helpers::bytes::to_u64;
use crate::helpers::bytes::to_usize;
use crate::helpers::bytes::to_usize_iter;
use encoding_rs::UTF_16LE;
use std::collections::HashMap;
use thiserror::Error;

/// Sector ids at or above this value are markers (free, end of chain, FAT, DIFAT).
const FIRST_MARKER_SECT: usize = 0xFFFF_FFFB;
const SIGNATURE: u64 = 0xE11A_B1A1_E011_CFD0;
const HEADER_SIZE: usize = 512;
const MINI_SECTOR_SIZE: usize = 64;
/// Streams smaller than this live in the mini stream.
const MINI_STREAM_CUTOFF: usize = 4096;

#[derive(Error, Debug)]
pub enum CfbError {
    #[error("The file is corrupted or has an invalid CFB structure")]
    FileFormatError,

    #[error("Invalid OLE signature (not an office document?)")]
    OleSignatureError,

    #[error("Invalid sector size '2 ^ {1}' for major version '{0}'")]
    SectorSizeError(u16, u16),

    #[error("Sector chain points outside the file at sector '{0}'")]
    SectorOutOfRange(usize),

    #[error("Sector chain starting at '{0}' loops")]
    SectorChainLoop(usize),

    #[error("Expected {0} DIFAT sectors, found {1}")]
    DifatCountError(usize, usize),

    #[error("Expected {0} FAT sectors, found {1}")]
    FatCountError(usize, usize),

    #[error("Empty root directory")]
    RootDirectoryError,
}

/// Parsed compound file: directory entries plus the two allocation tables needed
/// to follow stream chains.
pub(crate) struct Cfb {
    directories: HashMap<String, Directory>,
    fat: Vec<usize>,
    sectors: Sectors,
    mini_fat: Vec<usize>,
    mini_sectors: Sectors,
}

impl Cfb {
    /// Parses a compound file held entirely in `data`.
    pub(crate) fn parse(data: Vec<u8>) -> Result<Cfb, IngestError> {
        if data.len() < HEADER_SIZE {
            Err(CfbError::FileFormatError)?;
        }
        let header = Header::new(&data[..HEADER_SIZE])?;
        let size = header.sector_size()?;
        let sectors = Sectors { data, size, offset: size };
        let fat = Self::load_fat(&sectors, &header)?;
        let directories = Self::load_directories(&fat, &sectors, header.directory_start)?;
        let mini_fat = if header.mini_fat_count > 0 {
            let bytes = read_chain(&fat, &sectors, header.mini_fat_start)?;
            to_usize_iter(&bytes).collect()
        } else {
            Vec::new()
        };
        let mini_sectors = match directories.get("Root Entry") {
            Some(root) => {
                let mut data = read_chain(&fat, &sectors, root.start)?;
                data.truncate(root.size);
                Sectors { data, size: MINI_SECTOR_SIZE, offset: 0 }
            }
            None => Sectors { data: Vec::new(), size: MINI_SECTOR_SIZE, offset: 0 },
        };

        Ok(Cfb {
            directories,
            fat,
            sectors,
            mini_fat,
            mini_sectors,
        })
    }

    /// Returns true when a stream with this exact name exists.
    pub(crate) fn exists(&self, name: &str) -> bool {
        self.directories.contains_key(name)
    }

    /// Reads a whole stream, or `None` when the container has no stream by that name.
    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>, IngestError> {
        let Some(directory) = self.directories.get(name) else {
            return Ok(None);
        };
        let mut bytes = if directory.size < MINI_STREAM_CUTOFF {
            read_chain(&self.mini_fat, &self.mini_sectors, directory.start)?
        } else {
            read_chain(&self.fat, &self.sectors, directory.start)?
        };
        bytes.truncate(directory.size);
        Ok(Some(bytes))
    }

    /// Builds the FAT from the 109 header DIFAT slots plus any chained DIFAT sectors.
    fn load_fat(sectors: &Sectors, header: &Header) -> Result<Vec<usize>, IngestError> {
        let mut difat: Vec<usize> = to_usize_iter(&sectors.data[76..HEADER_SIZE]).collect();

        let mut count = 0usize;
        let mut index = header.difat_start;
        while index < FIRST_MARKER_SECT {
            if count > header.difat_count {
                Err(CfbError::SectorChainLoop(header.difat_start))?;
            }
            difat.extend(to_usize_iter(sectors.get(index)?));
            // Last slot of each DIFAT sector links to the next one.
            index = difat.pop().ok_or(CfbError::FileFormatError)?;
            count += 1;
        }
        if count != header.difat_count {
            Err(CfbError::DifatCountError(header.difat_count, count))?
        }

        let mut fat = Vec::new();
        let mut count = 0usize;
        for index in difat.into_iter().filter(|index| *index < FIRST_MARKER_SECT) {
            fat.extend(to_usize_iter(sectors.get(index)?));
            count += 1;
        }
        if count != header.fat_count {
            Err(CfbError::FatCountError(header.fat_count, count))?
        }
        Ok(fat)
    }

    fn load_directories(fat: &[usize], sectors: &Sectors, start: usize) -> Result<HashMap<String, Directory>, IngestError> {
        let bytes = read_chain(fat, sectors, start)?;
        let directories: HashMap<String, Directory> = bytes
            .chunks_exact(128)
            .map(Directory::new)
            .filter(|(name, _)| !name.is_empty())
            .collect();
        if directories.is_empty() {
            Err(CfbError::RootDirectoryError)?
        }
        Ok(directories)
    }
}

/// Follows a sector chain through an allocation table and concatenates the sectors.
fn read_chain(table: &[usize], sectors: &Sectors, start: usize) -> Result<Vec<u8>, IngestError> {
    let mut content = Vec::new();
    let mut index = start;
    let mut hops = 0usize;
    while index < FIRST_MARKER_SECT {
        if hops > table.len() {
            Err(CfbError::SectorChainLoop(start))?;
        }
        content.extend_from_slice(sectors.get(index)?);
        index = *table.get(index).ok_or(CfbError::SectorOutOfRange(index))?;
        hops += 1;
    }
    Ok(content)
}

/// Fixed-size sectors over one byte buffer.
struct Sectors {
    data: Vec<u8>,
    size: usize,
    /// Regular sectors sit after the header, which fills the first sector slot.
    /// Mini sectors start at zero inside the mini stream.
    offset: usize,
}

impl Sectors {
    fn get(&self, index: usize) -> Result<&[u8], IngestError> {
        let source = self.offset + index * self.size;
        if source >= self.data.len() {
            Err(CfbError::SectorOutOfRange(index))?;
        }
        let target = self.data.len().min(source + self.size);
        Ok(&self.data[source..target])
    }
}

struct Header {
    major_version: u16,
    sector_shift: u16,
    fat_count: usize,
    directory_start: usize,
    mini_fat_start: usize,
    mini_fat_count: usize,
    difat_start: usize,
    difat_count: usize,
}

impl Header {
    fn new(data: &[u8]) -> Result<Self, IngestError> {
        if to_u64(&data[0..8]) != SIGNATURE {
            Err(CfbError::OleSignatureError)?;
        }
        Ok(Header {
            major_version: to_u16(&data[26..28]),
            sector_shift: to_u16(&data[30..32]),
            fat_count: to_usize(&data[44..48]),
            directory_start: to_usize(&data[48..52]),
            mini_fat_start: to_usize(&data[60..64]),
            mini_fat_count: to_usize(&data[64..68]),
            difat_start: to_usize(&data[68..72]),
            difat_count: to_usize(&data[72..76]),
        })
    }

    fn sector_size(&self) -> Result<usize, IngestError> {
        match (self.major_version, self.sector_shift) {
            (3, 9) => Ok(512),
            // Version 4 pads the 512-byte header with zeroes up to the first 4096-byte sector.
            (4, 12) => Ok(4096),
            (major, shift) => Err(CfbError::SectorSizeError(major, shift))?,
        }
    }
}

struct Directory {
    start: usize,
    size: usize,
}

impl Directory {
    fn new(bytes: &[u8]) -> (String, Directory) {
        let length = (to_u16(&bytes[64..66]) as usize).min(64);
        let (name, _, _) = UTF_16LE.decode(&bytes[..length]);
        let name = match name.find('\0') {
            Some(position) => name[..position].to_owned(),
            None => name.into_owned(),
        };
        let start = to_usize(&bytes[116..120]);
        let size = to_u64(&bytes[120..128]) as usize;
        (name, Directory { start, size })
    }
}
