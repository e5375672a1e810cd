//! Minimal ISO9660 (level 1) image writer.
//!
//! Produces a single-file disc image used to hand the agent environment to
//! the guest through a virtual DVD drive. Layout:
//!
//! | sector | contents                          |
//! |--------|-----------------------------------|
//! | 0..16  | system area (zeros)               |
//! | 16     | primary volume descriptor         |
//! | 17     | volume descriptor set terminator  |
//! | 18     | type L path table                 |
//! | 19     | type M path table                 |
//! | 20     | root directory                    |
//! | 21..   | file data                         |

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::CoreError;

/// Logical sector and block size.
pub const SECTOR_SIZE: usize = 2048;

const VOLUME_DESCRIPTOR_MAGIC: &[u8] = b"CD001\x01";
const PRIMARY_VOLUME_SECTOR: u32 = 16;
const L_PATH_TABLE_SECTOR: u32 = 18;
const M_PATH_TABLE_SECTOR: u32 = 19;
const ROOT_DIRECTORY_SECTOR: u32 = 20;
const FIRST_DATA_SECTOR: u32 = 21;
const PATH_TABLE_LEN: u32 = 10;
const FLAG_DIRECTORY: u8 = 0x02;

/// Builds a disc image holding one file.
///
/// The file name is upper-cased and stored with an empty extension and a
/// `;1` version, as in `ENV.;1`.
///
/// # Errors
/// Returns [`CoreError::Iso`] if the name contains characters outside
/// `A-Z`, `0-9`, `_` and `.`, or if the contents exceed the 32-bit extent size.
pub fn build_image(
    file_name: &str,
    contents: &[u8],
    recorded_at: DateTime<Utc>,
) -> Result<Vec<u8>, CoreError> {
    let name = file_name.to_ascii_uppercase();
    if name.is_empty() || name.len() > 30 || !name.bytes().all(is_d_character) {
        return Err(CoreError::Iso(format!(
            "file name '{name}' violates ISO9660 constraints"
        )));
    }
    let data_len = u32::try_from(contents.len())
        .map_err(|_| CoreError::Iso(format!("file of {} bytes is too large", contents.len())))?;
    let total_sectors = FIRST_DATA_SECTOR + data_len.div_ceil(SECTOR_SIZE as u32);

    let mut w = SectorWriter::after_system_area(total_sectors as usize * SECTOR_SIZE);

    write_primary_volume_descriptor(&mut w, &name, total_sectors, &recorded_at)?;
    w.next_sector()?;

    w.write(&[0xFF])?;
    w.write(VOLUME_DESCRIPTOR_MAGIC)?;
    w.next_sector()?;

    write_path_table(&mut w, ByteOrder::Little)?;
    w.next_sector()?;
    write_path_table(&mut w, ByteOrder::Big)?;
    w.next_sector()?;

    debug_assert_eq!(w.current_sector(), ROOT_DIRECTORY_SECTOR);
    let dir_len = SECTOR_SIZE as u32;
    write_directory_record(&mut w, b"\x00", ROOT_DIRECTORY_SECTOR, dir_len, FLAG_DIRECTORY, &recorded_at)?;
    write_directory_record(&mut w, b"\x01", ROOT_DIRECTORY_SECTOR, dir_len, FLAG_DIRECTORY, &recorded_at)?;
    let identifier = format!("{name}.;1");
    write_directory_record(&mut w, identifier.as_bytes(), FIRST_DATA_SECTOR, data_len, 0, &recorded_at)?;
    w.next_sector()?;

    for chunk in contents.chunks(SECTOR_SIZE) {
        w.write(chunk)?;
        w.pad_sector();
    }

    let image = w.into_inner();
    debug_assert_eq!(image.len(), total_sectors as usize * SECTOR_SIZE);
    Ok(image)
}

fn is_d_character(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_' || b == b'.'
}

fn write_primary_volume_descriptor(
    w: &mut SectorWriter,
    volume_id: &str,
    total_sectors: u32,
    now: &DateTime<Utc>,
) -> Result<(), CoreError> {
    w.write(&[0x01])?;
    w.write(VOLUME_DESCRIPTOR_MAGIC)?;
    w.write(&[0x00])?;

    w.write_padded("", 32)?; // system identifier
    w.write_padded(volume_id, 32)?;
    w.write_zeros(8)?;
    w.write_both_u32(total_sectors)?;
    w.write_zeros(32)?;

    w.write_both_u16(1)?; // volume set size
    w.write_both_u16(1)?; // volume sequence number
    w.write_both_u16(SECTOR_SIZE as u16)?;
    w.write_both_u32(PATH_TABLE_LEN)?;

    w.write(&L_PATH_TABLE_SECTOR.to_le_bytes())?;
    w.write(&0u32.to_le_bytes())?;
    w.write(&M_PATH_TABLE_SECTOR.to_be_bytes())?;
    w.write(&0u32.to_be_bytes())?;

    write_directory_record(w, b"\x00", ROOT_DIRECTORY_SECTOR, SECTOR_SIZE as u32, FLAG_DIRECTORY, now)?;

    w.write_padded("", 128)?; // volume set
    w.write_padded("", 128)?; // publisher
    w.write_padded("", 128)?; // data preparer
    w.write_padded("", 128)?; // application
    w.write_padded("", 37)?; // copyright file
    w.write_padded("", 37)?; // abstract file
    w.write_padded("", 37)?; // bibliographic file

    w.write_volume_date(Some(now))?; // creation
    w.write_volume_date(Some(now))?; // modification
    w.write_volume_date(None)?; // expiration
    w.write_volume_date(None)?; // effective

    w.write(&[0x01, 0x00])?; // file structure version, reserved
    Ok(())
}

#[derive(Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

fn write_path_table(w: &mut SectorWriter, order: ByteOrder) -> Result<(), CoreError> {
    w.write(&[1, 0])?; // identifier length, extended attribute length
    match order {
        ByteOrder::Little => {
            w.write(&ROOT_DIRECTORY_SECTOR.to_le_bytes())?;
            w.write(&1u16.to_le_bytes())?;
        }
        ByteOrder::Big => {
            w.write(&ROOT_DIRECTORY_SECTOR.to_be_bytes())?;
            w.write(&1u16.to_be_bytes())?;
        }
    }
    w.write(&[0, 0])
}

fn write_directory_record(
    w: &mut SectorWriter,
    identifier: &[u8],
    extent: u32,
    data_len: u32,
    flags: u8,
    recorded_at: &DateTime<Utc>,
) -> Result<(), CoreError> {
    let id_len = u8::try_from(identifier.len())
        .map_err(|_| CoreError::Iso("directory identifier too long".into()))?;
    let padded = id_len % 2 == 0;
    let record_len = 33 + id_len + u8::from(padded);

    w.write(&[record_len, 0])?;
    w.write_both_u32(extent)?;
    w.write_both_u32(data_len)?;
    w.write_record_date(recorded_at)?;
    w.write(&[flags, 0, 0])?; // flags, file unit size, interleave gap
    w.write_both_u16(1)?; // volume sequence number
    w.write(&[id_len])?;
    w.write(identifier)?;
    if padded {
        w.write(&[0])?;
    }
    Ok(())
}

/// Append-only buffer that refuses writes crossing a sector boundary.
struct SectorWriter {
    buf: Vec<u8>,
}

impl SectorWriter {
    fn after_system_area(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity);
        buf.resize(PRIMARY_VOLUME_SECTOR as usize * SECTOR_SIZE, 0);
        Self { buf }
    }

    fn current_sector(&self) -> u32 {
        u32::try_from(self.buf.len() / SECTOR_SIZE).unwrap_or(u32::MAX)
    }

    fn remaining(&self) -> usize {
        SECTOR_SIZE - self.buf.len() % SECTOR_SIZE
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), CoreError> {
        if bytes.len() > self.remaining() {
            return Err(CoreError::Iso(format!(
                "write of {} bytes at offset {} crosses a sector boundary",
                bytes.len(),
                self.buf.len()
            )));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn write_zeros(&mut self, count: usize) -> Result<(), CoreError> {
        self.write(&vec![0; count])
    }

    fn write_padded(&mut self, s: &str, len: usize) -> Result<(), CoreError> {
        if s.len() > len {
            return Err(CoreError::Iso(format!("'{s}' exceeds field length {len}")));
        }
        self.write(s.as_bytes())?;
        self.write(&vec![b' '; len - s.len()])
    }

    fn write_both_u16(&mut self, v: u16) -> Result<(), CoreError> {
        self.write(&v.to_le_bytes())?;
        self.write(&v.to_be_bytes())
    }

    fn write_both_u32(&mut self, v: u32) -> Result<(), CoreError> {
        self.write(&v.to_le_bytes())?;
        self.write(&v.to_be_bytes())
    }

    /// 17-byte `YYYYMMDDHHMMSScc` plus UTC offset; all `'0'` when unspecified.
    fn write_volume_date(&mut self, at: Option<&DateTime<Utc>>) -> Result<(), CoreError> {
        match at {
            Some(at) => self.write(at.format("%Y%m%d%H%M%S00").to_string().as_bytes())?,
            None => self.write(&[b'0'; 16])?,
        }
        self.write(&[0])
    }

    /// 7-byte directory record date, years counted from 1900.
    fn write_record_date(&mut self, at: &DateTime<Utc>) -> Result<(), CoreError> {
        let byte = |v: u32| u8::try_from(v).unwrap_or_default();
        let year = u8::try_from(at.year() - 1900).unwrap_or_default();
        self.write(&[
            year,
            byte(at.month()),
            byte(at.day()),
            byte(at.hour()),
            byte(at.minute()),
            byte(at.second()),
            0,
        ])
    }

    fn next_sector(&mut self) -> Result<(), CoreError> {
        if self.remaining() == SECTOR_SIZE {
            return Err(CoreError::Iso(format!(
                "sector {} left empty",
                self.current_sector()
            )));
        }
        self.pad_sector();
        Ok(())
    }

    fn pad_sector(&mut self) {
        let rem = self.buf.len() % SECTOR_SIZE;
        if rem != 0 {
            self.buf.resize(self.buf.len() + SECTOR_SIZE - rem, 0);
        }
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 45).single().expect("valid date")
    }

    fn sector(image: &[u8], n: u32) -> &[u8] {
        let start = n as usize * SECTOR_SIZE;
        &image[start..start + SECTOR_SIZE]
    }

    #[test]
    fn image_has_volume_descriptors_in_place() {
        let image = build_image("env", b"{}", fixed_time()).expect("build");
        let pvd = sector(&image, PRIMARY_VOLUME_SECTOR);
        assert_eq!(pvd[0], 0x01);
        assert_eq!(&pvd[1..6], b"CD001");
        assert_eq!(&pvd[40..43], b"ENV");

        let terminator = sector(&image, PRIMARY_VOLUME_SECTOR + 1);
        assert_eq!(terminator[0], 0xFF);
        assert_eq!(&terminator[1..6], b"CD001");
    }

    #[test]
    fn volume_space_size_matches_image_length() {
        let image = build_image("env", &[7u8; 5000], fixed_time()).expect("build");
        let pvd = sector(&image, PRIMARY_VOLUME_SECTOR);
        let total = u32::from_le_bytes([pvd[80], pvd[81], pvd[82], pvd[83]]);
        assert_eq!(total, FIRST_DATA_SECTOR + 3, "5000 bytes span three data sectors");
        assert_eq!(image.len(), total as usize * SECTOR_SIZE);
    }

    #[test]
    fn root_directory_lists_versioned_file_name() {
        let image = build_image("env", b"hello", fixed_time()).expect("build");
        let root = sector(&image, ROOT_DIRECTORY_SECTOR);
        let needle = b"ENV.;1";
        assert!(
            root.windows(needle.len()).any(|w| w == needle),
            "root directory must name the file ENV.;1"
        );
    }

    #[test]
    fn directory_record_date_counts_years_from_1900() {
        let image = build_image("env", b"x", fixed_time()).expect("build");
        let root = sector(&image, ROOT_DIRECTORY_SECTOR);
        // first record: length byte, ext attr, 8 + 8 bytes of extent/size, then date
        assert_eq!(&root[18..24], &[124, 3, 9, 12, 30, 45]);
    }

    #[test]
    fn rejects_names_outside_d_characters() {
        match build_image("env-file", b"{}", fixed_time()) {
            Err(CoreError::Iso(msg)) => assert!(msg.contains("ENV-FILE"), "got {msg}"),
            other => panic!("expected Iso error, got {other:?}"),
        }
    }

    #[test]
    fn empty_file_still_produces_directory() {
        let image = build_image("env", b"", fixed_time()).expect("build");
        assert_eq!(image.len(), FIRST_DATA_SECTOR as usize * SECTOR_SIZE);
    }

    proptest! {
        #[test]
        fn file_data_starts_at_first_data_sector(contents in proptest::collection::vec(any::<u8>(), 0..9000)) {
            let image = build_image("env", &contents, fixed_time()).expect("build");
            let start = FIRST_DATA_SECTOR as usize * SECTOR_SIZE;
            prop_assert_eq!(&image[start..start + contents.len()], contents.as_slice());
            prop_assert_eq!(image.len() % SECTOR_SIZE, 0);
        }
    }
}
