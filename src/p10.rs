//! Just enough DICOM Part 10 parsing to name an object after its study,
//! series and SOP instance.
//!
//! Only the file meta group and the leading data elements are read. The scan
//! ends at SeriesInstanceUID (0020,000E), the highest tag of interest, or as
//! soon as the data cannot be followed.

use crate::domain::valid_dicom_uid;

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8] = b"DICM";

const META_GROUP: u32 = 0x0002;
const MEDIA_STORAGE_SOP_INSTANCE_UID: u32 = 0x0002_0003;
const TRANSFER_SYNTAX_UID: u32 = 0x0002_0010;
const SOP_INSTANCE_UID: u32 = 0x0008_0018;
const STUDY_INSTANCE_UID: u32 = 0x0020_000D;
const SERIES_INSTANCE_UID: u32 = 0x0020_000E;

const ITEM: u32 = 0xFFFE_E000;
const ITEM_DELIMITATION: u32 = 0xFFFE_E00D;
const SEQUENCE_DELIMITATION: u32 = 0xFFFE_E0DD;
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const MAX_NESTING: usize = 16;

const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";

/// VRs encoded with a reserved field and a 32-bit length in explicit VR.
const LONG_VRS: [&[u8]; 13] = [
    b"OB", b"OD", b"OF", b"OL", b"OV", b"OW", b"SQ", b"SV", b"UC", b"UN", b"UR", b"UT", b"UV",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identifiers {
    pub study: Option<String>,
    pub series: Option<String>,
    pub instance: Option<String>,
}

impl Identifiers {
    pub fn is_complete(&self) -> bool {
        self.study.is_some() && self.series.is_some() && self.instance.is_some()
    }

    /// `study/series/instance` when all three are known and are well formed
    /// UIDs. Header values are untrusted, so anything else yields `None`.
    pub fn path(&self) -> Option<String> {
        let study = valid_dicom_uid(self.study.as_deref())?;
        let series = valid_dicom_uid(self.series.as_deref())?;
        let instance = valid_dicom_uid(self.instance.as_deref())?;
        Some(format!("{study}/{series}/{instance}"))
    }
}

/// Reads the study, series and SOP instance UIDs from a P10 object.
/// Whatever could not be read is left as `None`.
pub fn scan_identifiers(data: &[u8]) -> Identifiers {
    let mut ids = Identifiers::default();
    // A short read only means some identifiers stay unknown.
    let _ = scan(data, &mut ids);
    ids
}

fn scan(data: &[u8], ids: &mut Identifiers) -> Option<()> {
    if data.get(PREAMBLE_LEN..PREAMBLE_LEN + MAGIC.len())? != MAGIC {
        return None;
    }
    let mut reader = Reader {
        data,
        pos: PREAMBLE_LEN + MAGIC.len(),
    };

    let mut transfer_syntax = None;
    loop {
        let start = reader.pos;
        let element = reader.header(true)?;
        if element.tag >> 16 != META_GROUP {
            reader.pos = start;
            break;
        }
        match element.tag {
            TRANSFER_SYNTAX_UID => transfer_syntax = uid(reader.bytes(element.length)?),
            MEDIA_STORAGE_SOP_INSTANCE_UID => ids.instance = uid(reader.bytes(element.length)?),
            _ => reader.skip_value(&element, true, 0)?,
        }
    }

    let explicit = match transfer_syntax.as_deref() {
        Some(IMPLICIT_VR_LITTLE_ENDIAN) => false,
        Some(EXPLICIT_VR_BIG_ENDIAN | DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN) => return None,
        _ => true,
    };

    loop {
        let element = reader.header(explicit)?;
        if element.tag > SERIES_INSTANCE_UID {
            return Some(());
        }
        match element.tag {
            SOP_INSTANCE_UID => {
                if let Some(value) = uid(reader.bytes(element.length)?) {
                    ids.instance = Some(value);
                }
            }
            STUDY_INSTANCE_UID => ids.study = uid(reader.bytes(element.length)?),
            SERIES_INSTANCE_UID => {
                ids.series = uid(reader.bytes(element.length)?);
                return Some(());
            }
            _ => reader.skip_value(&element, explicit, 0)?,
        }
    }
}

fn uid(value: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(value).ok()?;
    let text = text.trim_end_matches(['\0', ' ']).trim();
    (!text.is_empty()).then(|| text.to_string())
}

struct Element {
    tag: u32,
    vr: Option<[u8; 2]>,
    length: u32,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, length: u32) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(usize::try_from(length).ok()?)?;
        let value = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(value)
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.bytes(2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        let bytes = self.bytes(4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn tag(&mut self) -> Option<u32> {
        let group = self.u16()?;
        let element = self.u16()?;
        Some(u32::from(group) << 16 | u32::from(element))
    }

    fn header(&mut self, explicit: bool) -> Option<Element> {
        let tag = self.tag()?;
        // Item and delimiter tags never carry a VR.
        if !explicit || tag >> 16 == 0xFFFE {
            return Some(Element {
                tag,
                vr: None,
                length: self.u32()?,
            });
        }
        let vr = self.bytes(2)?;
        let vr = [vr[0], vr[1]];
        let length = if LONG_VRS.contains(&vr.as_slice()) {
            self.bytes(2)?;
            self.u32()?
        } else {
            u32::from(self.u16()?)
        };
        Some(Element {
            tag,
            vr: Some(vr),
            length,
        })
    }

    fn skip_value(&mut self, element: &Element, explicit: bool, depth: usize) -> Option<()> {
        if element.length != UNDEFINED_LENGTH {
            return self.bytes(element.length).map(|_| ());
        }
        if depth >= MAX_NESTING {
            return None;
        }
        // Undefined length UN content is always implicit VR.
        let explicit = explicit && element.vr != Some(*b"UN");
        self.skip_items(explicit, depth + 1)
    }

    fn skip_items(&mut self, explicit: bool, depth: usize) -> Option<()> {
        loop {
            let tag = self.tag()?;
            let length = self.u32()?;
            match tag {
                SEQUENCE_DELIMITATION => return Some(()),
                ITEM if length == UNDEFINED_LENGTH => self.skip_item_elements(explicit, depth)?,
                ITEM => {
                    self.bytes(length)?;
                }
                _ => return None,
            }
        }
    }

    fn skip_item_elements(&mut self, explicit: bool, depth: usize) -> Option<()> {
        loop {
            let element = self.header(explicit)?;
            if element.tag == ITEM_DELIMITATION {
                return Some(());
            }
            self.skip_value(&element, explicit, depth)?;
        }
    }
}
