// svndiff format described in
// https://svn.apache.org/repos/asf/subversion/trunk/notes/svndiff

#[derive(Debug)]
pub(crate) enum ApplyError {
    InvalidDeltaHeader,
    DestIo(std::io::Error),
    InvalidVarLenInt,
    OffsetTooLarge,
    LenTooLarge,
    SourceViewOutOfBounds {
        source_len: usize,
        view_offset: usize,
        view_len: usize,
    },
    TruncatedInstrs,
    TruncatedNewData,
    NotEnoughNewData,
    InvalidInstr,
    MismatchedTargetLen,
    Decompress(String),
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::InvalidDeltaHeader => write!(f, "invalid delta header"),
            Self::DestIo(ref e) => write!(f, "destination I/O error: {e}"),
            Self::InvalidVarLenInt => write!(f, "invalid variable-length integer"),
            Self::OffsetTooLarge => write!(f, "offset too large"),
            Self::LenTooLarge => write!(f, "length too large"),
            Self::SourceViewOutOfBounds {
                source_len,
                view_offset,
                view_len,
            } => write!(
                f,
                "source view with offset {view_offset} and length {view_len} out of bounds, source length is {source_len}",
            ),
            Self::TruncatedInstrs => write!(f, "truncated instructions"),
            Self::TruncatedNewData => write!(f, "truncated new data"),
            Self::NotEnoughNewData => write!(f, "not enough new data"),
            Self::InvalidInstr => write!(f, "invalid instruction"),
            Self::MismatchedTargetLen => write!(f, "mismatched target length"),
            Self::Decompress(ref e) => write!(f, "failed to decompress window section: {e}"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Version {
    Zero,
    /// Instruction and new-data sections are individually zlib-compressed;
    /// the length read from the window header is the compressed length.
    One,
    /// Like `One`, but LZ4-framed instead of zlib.
    Two,
}

fn decompress_section(raw: &[u8], version: Version) -> Result<std::borrow::Cow<'_, [u8]>, ApplyError> {
    match version {
        Version::Zero => Ok(std::borrow::Cow::Borrowed(raw)),
        Version::One => {
            use std::io::Read as _;
            let mut out = Vec::new();
            flate2::read::ZlibDecoder::new(raw)
                .read_to_end(&mut out)
                .map_err(|e| ApplyError::Decompress(e.to_string()))?;
            Ok(std::borrow::Cow::Owned(out))
        }
        Version::Two => {
            use std::io::Read as _;
            let mut out = Vec::new();
            lz4_flex::frame::FrameDecoder::new(raw)
                .read_to_end(&mut out)
                .map_err(|e| ApplyError::Decompress(e.to_string()))?;
            Ok(std::borrow::Cow::Owned(out))
        }
    }
}

pub(crate) fn apply(
    delta: &[u8],
    source: &[u8],
    dest: &mut dyn std::io::Write,
) -> Result<(), ApplyError> {
    let mut rem_delta = delta;
    let header = rem_delta
        .strip_prefix(b"SVN")
        .ok_or(ApplyError::InvalidDeltaHeader)?;
    let (&version_byte, new_rem_delta) =
        header.split_first().ok_or(ApplyError::InvalidDeltaHeader)?;
    let version = match version_byte {
        0 => Version::Zero,
        1 => Version::One,
        2 => Version::Two,
        _ => return Err(ApplyError::InvalidDeltaHeader),
    };
    rem_delta = new_rem_delta;

    while !rem_delta.is_empty() {
        let source_view_off = read_var_len_int(&mut rem_delta)?;
        let source_view_len = read_var_len_int(&mut rem_delta)?;
        let target_view_len = read_var_len_int(&mut rem_delta)?;
        let instrs_len = read_var_len_int(&mut rem_delta)?;
        let new_data_len = read_var_len_int(&mut rem_delta)?;

        let source_view_off =
            usize::try_from(source_view_off).map_err(|_| ApplyError::OffsetTooLarge)?;
        let source_view_len =
            usize::try_from(source_view_len).map_err(|_| ApplyError::LenTooLarge)?;
        let source_view = source
            .get(source_view_off..(source_view_off + source_view_len))
            .ok_or(ApplyError::SourceViewOutOfBounds {
                source_len: source.len(),
                view_offset: source_view_off,
                view_len: source_view_len,
            })?;

        let instrs_len = usize::try_from(instrs_len).map_err(|_| ApplyError::LenTooLarge)?;
        if rem_delta.len() < instrs_len {
            return Err(ApplyError::TruncatedInstrs);
        }
        let raw_instrs;
        (raw_instrs, rem_delta) = rem_delta.split_at(instrs_len);
        let instrs_buf = decompress_section(raw_instrs, version)?;
        let mut instrs: &[u8] = &instrs_buf;

        let new_data_len = usize::try_from(new_data_len).map_err(|_| ApplyError::LenTooLarge)?;
        if rem_delta.len() < new_data_len {
            return Err(ApplyError::TruncatedNewData);
        }
        let raw_new_data;
        (raw_new_data, rem_delta) = rem_delta.split_at(new_data_len);
        let new_data_buf = decompress_section(raw_new_data, version)?;
        let mut new_data: &[u8] = &new_data_buf;

        let target_view_len =
            usize::try_from(target_view_len).map_err(|_| ApplyError::LenTooLarge)?;
        let mut target_buf = Vec::with_capacity(target_view_len);

        while !instrs.is_empty() {
            let (instr, copy_len) = read_instruction(&mut instrs)?;
            let copy_len = usize::try_from(copy_len).map_err(|_| ApplyError::LenTooLarge)?;

            match instr {
                0b00 => {
                    // copy from source view
                    let copy_offset = read_var_len_int(&mut instrs)?;
                    let copy_offset =
                        usize::try_from(copy_offset).map_err(|_| ApplyError::OffsetTooLarge)?;

                    target_buf.extend(&source_view[copy_offset..(copy_offset + copy_len)]);
                }
                0b01 => {
                    // copy from target view
                    let copy_offset = read_var_len_int(&mut instrs)?;
                    let copy_offset =
                        usize::try_from(copy_offset).map_err(|_| ApplyError::LenTooLarge)?;

                    for i in 0..copy_len {
                        target_buf.push(target_buf[copy_offset + i]);
                    }
                }
                0b10 => {
                    // copy from new data
                    if copy_len > new_data.len() {
                        return Err(ApplyError::NotEnoughNewData);
                    }
                    let copy_data;
                    (copy_data, new_data) = new_data.split_at(copy_len);
                    target_buf.extend(copy_data);
                }
                0b11 => {
                    // invalid
                    return Err(ApplyError::InvalidInstr);
                }
                _ => unreachable!(),
            }
        }

        if target_buf.len() != target_view_len {
            return Err(ApplyError::MismatchedTargetLen);
        }

        dest.write_all(&target_buf).map_err(ApplyError::DestIo)?;
    }

    Ok(())
}

fn read_var_len_int(src: &mut &[u8]) -> Result<u64, ApplyError> {
    let mut value = 0;
    loop {
        let byte;
        (byte, *src) = src.split_first().ok_or(ApplyError::InvalidVarLenInt)?;

        if value > (u64::MAX >> 7) {
            return Err(ApplyError::InvalidVarLenInt);
        }

        value = (value << 7) | u64::from(byte & 0x7F);
        if (byte & 0x80) == 0 {
            return Ok(value);
        }
    }
}

fn read_instruction(src: &mut &[u8]) -> Result<(u8, u64), ApplyError> {
    let first_byte = src[0];
    *src = &src[1..];

    let instr = first_byte >> 6;

    if (first_byte & 0x3F) != 0 {
        let len = u64::from(first_byte & 0x3F);
        Ok((instr, len))
    } else {
        let len = read_var_len_int(src)?;
        Ok((instr, len))
    }
}

#[cfg(test)]
mod tests {
    use super::apply;

    #[test]
    fn test_apply() {
        // Example from specification document
        let source = b"aaaabbbbcccc";
        let delta = &[
            b'S', b'V', b'N', 0,    // header
            0x00, // source view offset 0
            0x0C, // source view length 12
            0x10, // target view length 16
            0x07, // instructions length 7
            0x01, // new data length 1
            0x04, 0x00, // source, length 4, offset 0
            0x04, 0x08, // source, length 4, offset 8
            0x81, // new, length 1
            0x47, 0x08, // target, length 7, offset 8
            b'd', // new data 'd'
        ];
        let expected_target = b"aaaaccccdddddddd";

        let mut target = Vec::new();
        apply(delta, source, &mut target).unwrap();

        assert_eq!(target, expected_target);
    }

    #[test]
    fn test_apply_v1_compressed() {
        use std::io::Write as _;

        let source = b"aaaabbbbcccc";

        let raw_instrs: &[u8] = &[
            0x04, 0x00, // source, length 4, offset 0
            0x04, 0x08, // source, length 4, offset 8
            0x81, // new, length 1
            0x47, 0x08, // target, length 7, offset 8
        ];
        let raw_new_data: &[u8] = b"d";

        let mut instrs_encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        instrs_encoder.write_all(raw_instrs).unwrap();
        let compressed_instrs = instrs_encoder.finish().unwrap();

        let mut new_data_encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        new_data_encoder.write_all(raw_new_data).unwrap();
        let compressed_new_data = new_data_encoder.finish().unwrap();

        let mut delta = vec![b'S', b'V', b'N', 1];
        delta.push(0x00); // source view offset 0
        delta.push(0x0C); // source view length 12
        delta.push(0x10); // target view length 16
        delta.push(u8::try_from(compressed_instrs.len()).unwrap());
        delta.push(u8::try_from(compressed_new_data.len()).unwrap());
        delta.extend(&compressed_instrs);
        delta.extend(&compressed_new_data);

        let expected_target = b"aaaaccccdddddddd";

        let mut target = Vec::new();
        apply(&delta, source, &mut target).unwrap();

        assert_eq!(target, expected_target);
    }
}
