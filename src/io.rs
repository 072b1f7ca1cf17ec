use crate::{
    config,
    error::{CpdError, Result},
    point_cloud::PointSet,
};
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};
use std::{
    fs,
    io::{BufRead, BufReader, Write},
    path::Path,
};

/// Loads a point cloud, picking the parser from the file extension.
///
/// `.pcd` and `.ply` are handed to their codec crates; `.xyz`/`.txt` is
/// whitespace separated rows of 2 or 3 coordinates. Anything else is a
/// load error, as is a missing or unparseable file.
pub fn load(path: &Path) -> Result<PointSet> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pcd" => load_pcd(path),
        "ply" => load_ply(path),
        "xyz" | "txt" => load_xyz(path),
        other => Err(CpdError::load(
            path,
            format!("unsupported extension {other:?} (expected .pcd/.ply/.xyz)"),
        )),
    }
}

fn load_pcd(path: &Path) -> Result<PointSet> {
    let reader = pcd_rs::DynReader::open(path).map_err(|e| CpdError::load(path, e))?;
    let mut flat = Vec::new();
    for record in reader {
        let record = record.map_err(|e| CpdError::load(path, e))?;
        // x, y, z lead the field list of every pcd this tool consumes;
        // trailing fields (intensity, rgb, ...) are ignored
        if record.0.len() < 3 {
            return Err(CpdError::load(path, "pcd record has fewer than 3 fields"));
        }
        for field in record.0.iter().take(3) {
            let value = field_scalar(field)
                .ok_or_else(|| CpdError::load(path, "pcd coordinate field is not scalar"))?;
            flat.push(value);
        }
    }
    Ok(PointSet::from_flat(&flat, 3))
}

fn field_scalar(field: &pcd_rs::Field) -> Option<f64> {
    use pcd_rs::Field;
    match field {
        Field::I8(v) => v.first().map(|&x| x as f64),
        Field::I16(v) => v.first().map(|&x| x as f64),
        Field::I32(v) => v.first().map(|&x| x as f64),
        Field::U8(v) => v.first().map(|&x| x as f64),
        Field::U16(v) => v.first().map(|&x| x as f64),
        Field::U32(v) => v.first().map(|&x| x as f64),
        Field::F32(v) => v.first().map(|&x| x as f64),
        Field::F64(v) => v.first().copied(),
    }
}

fn load_ply(path: &Path) -> Result<PointSet> {
    let file = fs::File::open(path).map_err(|e| CpdError::load(path, e))?;
    let mut reader = BufReader::new(file);
    let parser = Parser::<DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| CpdError::load(path, e))?;
    let vertices = ply
        .payload
        .get("vertex")
        .ok_or_else(|| CpdError::load(path, "ply file has no vertex element"))?;

    let mut flat = Vec::with_capacity(vertices.len() * 3);
    for vertex in vertices {
        for key in ["x", "y", "z"] {
            let value = match vertex.get(key) {
                Some(Property::Float(v)) => *v as f64,
                Some(Property::Double(v)) => *v,
                _ => {
                    return Err(CpdError::load(
                        path,
                        format!("ply vertex is missing float property {key:?}"),
                    ))
                }
            };
            flat.push(value);
        }
    }
    Ok(PointSet::from_flat(&flat, 3))
}

fn load_xyz(path: &Path) -> Result<PointSet> {
    let file = fs::File::open(path).map_err(|e| CpdError::load(path, e))?;
    let reader = BufReader::new(file);

    let mut dim = 0;
    let mut flat = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| CpdError::load(path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let row: std::result::Result<Vec<f64>, _> =
            trimmed.split_whitespace().map(str::parse).collect();
        let row = row.map_err(|e| {
            CpdError::load(path, format!("line {}: {e}", line_no + 1))
        })?;
        if dim == 0 {
            if row.len() != 2 && row.len() != 3 {
                return Err(CpdError::load(
                    path,
                    format!("line {}: expected 2 or 3 columns, got {}", line_no + 1, row.len()),
                ));
            }
            dim = row.len();
        } else if row.len() != dim {
            return Err(CpdError::load(
                path,
                format!("line {}: expected {dim} columns, got {}", line_no + 1, row.len()),
            ));
        }
        flat.extend(row);
    }
    Ok(PointSet::from_flat(&flat, dim.max(2)))
}

pub fn read_config_json(path: &Path) -> Result<config::Config> {
    let file = fs::File::open(path).map_err(|e| CpdError::Config(e.to_string()))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| CpdError::Config(e.to_string()))
}

pub fn write_config_json(path: &Path, config: &config::Config) -> Result<()> {
    let j = serde_json::to_string_pretty(config).map_err(|e| CpdError::Config(e.to_string()))?;
    let mut file = fs::File::create(path).map_err(|e| CpdError::Config(e.to_string()))?;
    file.write_all(j.as_bytes())
        .map_err(|e| CpdError::Config(e.to_string()))
}

/// Reads `path` when it exists, compiled defaults otherwise. A present but
/// malformed config file is an error, not a silent fallback.
pub fn config_or_default(path: &Path) -> Result<config::Config> {
    if path.exists() {
        read_config_json(path)
    } else {
        Ok(config::Config::default_values())
    }
}
