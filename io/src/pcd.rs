//! PCD (Point Cloud Data) I/O
//!
//! PCD is the native format for Point Cloud Library (PCL). Colors are read
//! from a packed `rgb`/`rgba` field (integer, or float carrying the packed
//! bits) or from separate `r g b` fields. Separate channels declared with
//! TYPE `F` are normalized to [0, 1]; any other type holds 0..=255 values.
//! Fields with `COUNT` above one occupy that many columns.

use crate::{Error, Result};
use nalgebra::{Point3, Vector3};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use sv_core::{PointCloud, Rgb};
use tracing::debug;

/// PCD data format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcdData {
    Ascii,
    Binary,
    BinaryCompressed,
}

struct Header {
    fields: Vec<String>,
    types: Vec<char>,
    counts: Vec<usize>,
    width: usize,
    height: usize,
    points: usize,
}

impl Header {
    fn position(&self, names: &[&str]) -> Option<usize> {
        self.fields.iter().position(|f| names.contains(&f.as_str()))
    }

    fn type_of(&self, idx: usize) -> char {
        self.declared_type(idx).unwrap_or('F')
    }

    fn declared_type(&self, idx: usize) -> Option<char> {
        self.types.get(idx).copied()
    }

    fn count_of(&self, idx: usize) -> usize {
        self.counts.get(idx).copied().unwrap_or(1)
    }

    /// First data column of field `idx`.
    fn column(&self, idx: usize) -> usize {
        (0..idx).map(|i| self.count_of(i)).sum()
    }

    fn columns(&self) -> usize {
        self.column(self.fields.len())
    }
}

/// Read a PCD file
pub fn read_pcd<R: BufRead>(reader: R) -> Result<PointCloud> {
    let mut lines = reader.lines();
    let mut header = Header {
        fields: Vec::new(),
        types: Vec::new(),
        counts: Vec::new(),
        width: 0,
        height: 1,
        points: 0,
    };
    let data_format;

    loop {
        let line = lines
            .next()
            .ok_or_else(|| Error::Parse("Unexpected EOF in header".to_string()))??;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts[0] {
            "FIELDS" => {
                header.fields = parts[1..].iter().map(|s| s.to_string()).collect();
            }
            "TYPE" => {
                header.types = parts[1..].iter().filter_map(|s| s.chars().next()).collect();
            }
            "COUNT" => {
                header.counts = parts[1..]
                    .iter()
                    .map(|s| {
                        s.parse::<usize>()
                            .ok()
                            .filter(|&c| c > 0)
                            .ok_or_else(|| Error::Parse(format!("Invalid COUNT value '{s}'")))
                    })
                    .collect::<Result<_>>()?;
            }
            "WIDTH" => {
                header.width = parse_header_value(&parts, "WIDTH")?;
            }
            "HEIGHT" => {
                header.height = parse_header_value(&parts, "HEIGHT")?;
            }
            "POINTS" => {
                header.points = parse_header_value(&parts, "POINTS")?;
            }
            "DATA" => {
                data_format = match parts.get(1).copied() {
                    Some("binary") => PcdData::Binary,
                    Some("binary_compressed") => PcdData::BinaryCompressed,
                    _ => PcdData::Ascii,
                };
                break;
            }
            _ => {}
        }
    }

    if header.points == 0 {
        header.points = header.width * header.height;
    }
    if !header.counts.is_empty() && header.counts.len() != header.fields.len() {
        return Err(Error::Parse(format!(
            "COUNT lists {} values for {} fields",
            header.counts.len(),
            header.fields.len()
        )));
    }
    for axis in ["x", "y", "z"] {
        match header.position(&[axis]) {
            None => return Err(Error::Parse(format!("PCD header has no '{axis}' field"))),
            Some(idx) if header.count_of(idx) != 1 => {
                return Err(Error::Parse(format!("PCD field '{axis}' must have COUNT 1")))
            }
            Some(_) => {}
        }
    }

    // Parse data
    match data_format {
        PcdData::Ascii => parse_pcd_ascii(lines, &header),
        PcdData::Binary => Err(Error::UnsupportedFormat(
            "Binary PCD not supported".to_string(),
        )),
        PcdData::BinaryCompressed => Err(Error::UnsupportedFormat(
            "Binary compressed PCD not supported".to_string(),
        )),
    }
}

fn parse_header_value(parts: &[&str], key: &str) -> Result<usize> {
    parts
        .get(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Parse(format!("Invalid {key} line")))
}

fn parse_float(token: &str, line_no: usize) -> Result<f32> {
    token
        .parse()
        .map_err(|_| Error::Parse(format!("Invalid number '{token}' on data line {line_no}")))
}

/// Packed 0x00RRGGBB color from an `rgb` token.
fn parse_packed(token: &str, ty: char, line_no: usize) -> Result<Rgb> {
    let packed = match token.parse::<u32>() {
        Ok(v) => v,
        Err(_) if ty == 'F' => parse_float(token, line_no)?.to_bits(),
        Err(_) => return Err(Error::Parse(format!("Invalid rgb '{token}' on data line {line_no}"))),
    };
    Ok([
        ((packed >> 16) & 0xFF) as u8,
        ((packed >> 8) & 0xFF) as u8,
        (packed & 0xFF) as u8,
    ])
}

fn parse_channel(token: &str, ty: Option<char>, line_no: usize) -> Result<u8> {
    let v = parse_float(token, line_no)?;
    let v = if ty == Some('F') { v * 255.0 } else { v };
    Ok(v.round().clamp(0.0, 255.0) as u8)
}

fn parse_pcd_ascii<I>(lines: I, header: &Header) -> Result<PointCloud>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    let count = header.points;
    let mut points = Vec::with_capacity(count);

    let col = |names: &[&str]| header.position(names).map(|i| header.column(i));
    let x_idx = col(&["x"]).unwrap_or(0);
    let y_idx = col(&["y"]).unwrap_or(1);
    let z_idx = col(&["z"]).unwrap_or(2);

    let normal_idx = match (
        col(&["normal_x", "nx"]),
        col(&["normal_y", "ny"]),
        col(&["normal_z", "nz"]),
    ) {
        (Some(a), Some(b), Some(c)) => Some([a, b, c]),
        _ => None,
    };
    let rgb_field = header.position(&["rgb", "rgba"]);
    let rgb_idx = rgb_field.map(|i| (header.column(i), header.type_of(i)));
    let split_idx = match (header.position(&["r"]), header.position(&["g"]), header.position(&["b"])) {
        (Some(r), Some(g), Some(b)) => Some([r, g, b].map(|i| (header.column(i), header.declared_type(i)))),
        _ => None,
    };
    let columns = header.columns();

    let mut normals: Option<Vec<Vector3<f32>>> = normal_idx.map(|_| Vec::with_capacity(count));
    let mut colors: Option<Vec<Rgb>> = (rgb_idx.is_some() || split_idx.is_some()).then(|| Vec::with_capacity(count));

    for (line_no, line) in lines.enumerate() {
        if points.len() >= count {
            break;
        }
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < columns {
            return Err(Error::Parse(format!(
                "Data line {} has {} values, expected {}",
                line_no + 1,
                tokens.len(),
                columns
            )));
        }

        // Read point
        let x = parse_float(tokens[x_idx], line_no + 1)?;
        let y = parse_float(tokens[y_idx], line_no + 1)?;
        let z = parse_float(tokens[z_idx], line_no + 1)?;
        points.push(Point3::new(x, y, z));

        // Read normals
        if let (Some(n), Some([a, b, c])) = (normals.as_mut(), normal_idx) {
            n.push(Vector3::new(
                parse_float(tokens[a], line_no + 1)?,
                parse_float(tokens[b], line_no + 1)?,
                parse_float(tokens[c], line_no + 1)?,
            ));
        }

        // Read colors
        if let Some(c) = colors.as_mut() {
            if let Some((idx, ty)) = rgb_idx {
                c.push(parse_packed(tokens[idx], ty, line_no + 1)?);
            } else if let Some(channels) = split_idx {
                let mut rgb = [0u8; 3];
                for (out, (idx, ty)) in rgb.iter_mut().zip(channels) {
                    *out = parse_channel(tokens[idx], ty, line_no + 1)?;
                }
                c.push(rgb);
            }
        }
    }

    if points.len() < count {
        return Err(Error::Parse(format!(
            "PCD declares {} points but holds {}",
            count,
            points.len()
        )));
    }

    debug!(points = points.len(), colors = colors.is_some(), "read pcd");
    let organized = header.height > 1;
    Ok(PointCloud::from_parts(points, colors, normals, "")?.with_organized(organized))
}

/// Write point cloud to PCD format (ASCII)
pub fn write_pcd<W: Write>(writer: &mut W, cloud: &PointCloud) -> Result<()> {
    let num_points = cloud.len();
    let has_normals = cloud.normals().is_some();
    let has_colors = cloud.has_colors();

    // Write header
    writeln!(writer, "# .PCD v0.7 - Point Cloud Data file format")?;
    writeln!(writer, "VERSION 0.7")?;

    let mut fields = vec!["x", "y", "z"];
    let mut types = vec!["F", "F", "F"];
    if has_normals {
        fields.extend(["normal_x", "normal_y", "normal_z"]);
        types.extend(["F", "F", "F"]);
    }
    if has_colors {
        fields.push("rgb");
        types.push("U");
    }
    writeln!(writer, "FIELDS {}", fields.join(" "))?;
    writeln!(writer, "SIZE {}", vec!["4"; fields.len()].join(" "))?;
    writeln!(writer, "TYPE {}", types.join(" "))?;
    writeln!(writer, "COUNT {}", vec!["1"; fields.len()].join(" "))?;
    writeln!(writer, "WIDTH {}", num_points)?;
    writeln!(writer, "HEIGHT 1")?;
    writeln!(writer, "VIEWPOINT 0 0 0 1 0 0 0")?;
    writeln!(writer, "POINTS {}", num_points)?;
    writeln!(writer, "DATA ascii")?;

    // Write data
    for (i, p) in cloud.points().iter().enumerate() {
        write!(writer, "{} {} {}", p.x, p.y, p.z)?;

        if let Some(normals) = cloud.normals() {
            let n = normals[i];
            write!(writer, " {} {} {}", n.x, n.y, n.z)?;
        }

        if let Some(colors) = cloud.colors() {
            let [r, g, b] = colors[i];
            let packed: u32 = ((r as u32) << 16) | ((g as u32) << 8) | b as u32;
            write!(writer, " {}", packed)?;
        }

        writeln!(writer)?;
    }

    Ok(())
}

pub fn read_pcd_file<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    read_pcd(BufReader::new(File::open(path)?))
}

pub fn write_pcd_file<P: AsRef<Path>>(path: P, cloud: &PointCloud) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_pcd(&mut writer, cloud)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_then_read_keeps_colors() {
        let cloud = PointCloud::new(vec![Point3::new(0.0, 0.5, 1.0), Point3::new(-1.0, 2.0, 3.5)])
            .with_colors(vec![[255, 0, 0], [12, 34, 56]])
            .unwrap();

        let mut buf = Vec::new();
        write_pcd(&mut buf, &cloud).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("FIELDS x y z rgb"));

        let loaded = read_pcd(Cursor::new(buf)).unwrap();
        assert_eq!(loaded.points(), cloud.points());
        assert_eq!(loaded.colors().unwrap(), &[[255, 0, 0], [12, 34, 56]]);
    }

    #[test]
    fn test_read_float_packed_rgb() {
        let packed = f32::from_bits(0x00FF8000);
        let text = format!(
            "VERSION 0.7\nFIELDS x y z rgb\nSIZE 4 4 4 4\nTYPE F F F F\nCOUNT 1 1 1 1\n\
             WIDTH 1\nHEIGHT 1\nPOINTS 1\nDATA ascii\n0.1 0.2 0.3 {:e}\n",
            packed
        );
        let cloud = read_pcd(Cursor::new(text)).unwrap();
        assert_eq!(cloud.colors().unwrap()[0], [255, 128, 0]);
    }

    #[test]
    fn test_read_separate_channels_and_normals() {
        let text = "FIELDS x y z normal_x normal_y normal_z r g b\nWIDTH 2\nHEIGHT 1\nDATA ascii\n\
                    0 0 1 0 0 -1 10 20 30\n1 0 1 0 0 -1 40 50 60\n";
        let cloud = read_pcd(Cursor::new(text)).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.colors().unwrap()[1], [40, 50, 60]);
        assert_eq!(cloud.normals().unwrap()[0].z, -1.0);
    }

    #[test]
    fn test_channel_type_decides_scale() {
        let text = "FIELDS x y z r g b\nTYPE F F F U U U\nWIDTH 1\nHEIGHT 1\nDATA ascii\n0 0 1 1.0 0 255.0\n";
        let cloud = read_pcd(Cursor::new(text)).unwrap();
        assert_eq!(cloud.colors().unwrap()[0], [1, 0, 255]);

        let text = "FIELDS x y z r g b\nTYPE F F F F F F\nWIDTH 1\nHEIGHT 1\nDATA ascii\n0 0 1 1.0 0.5 0\n";
        let cloud = read_pcd(Cursor::new(text)).unwrap();
        assert_eq!(cloud.colors().unwrap()[0], [255, 128, 0]);
    }

    #[test]
    fn test_multi_count_field_shifts_columns() {
        let text = "FIELDS x y z descriptor rgb\nTYPE F F F F U\nCOUNT 1 1 1 3 1\nWIDTH 2\nHEIGHT 1\nDATA ascii\n\
                    0 0 1 9 9 9 16711680\n1 0 1 7 7 7 255\n";
        let cloud = read_pcd(Cursor::new(text)).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.colors().unwrap(), &[[255, 0, 0], [0, 0, 255]]);

        let short = "FIELDS x y z descriptor\nCOUNT 1 1 1 3\nWIDTH 1\nDATA ascii\n0 0 1 9\n";
        assert!(matches!(read_pcd(Cursor::new(short)), Err(Error::Parse(_))));

        let vector_x = "FIELDS x y z\nCOUNT 2 1 1\nWIDTH 1\nDATA ascii\n0 0 0 1\n";
        assert!(matches!(read_pcd(Cursor::new(vector_x)), Err(Error::Parse(_))));
    }

    #[test]
    fn test_truncated_data_is_error() {
        let text = "FIELDS x y z\nPOINTS 3\nDATA ascii\n0 0 0\n";
        assert!(matches!(read_pcd(Cursor::new(text)), Err(Error::Parse(_))));
    }

    #[test]
    fn test_binary_unsupported() {
        let text = "FIELDS x y z\nPOINTS 1\nDATA binary\n";
        assert!(matches!(read_pcd(Cursor::new(text)), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_file_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.pcd");
        let cloud = PointCloud::new(vec![Point3::new(1.0, 2.0, 3.0)]);
        write_pcd_file(&path, &cloud).unwrap();
        let loaded = read_pcd_file(&path).unwrap();
        assert_eq!(loaded.points(), cloud.points());
        assert!(!loaded.has_colors());
    }
}
