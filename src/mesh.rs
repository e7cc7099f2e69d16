//! # Meshes
//!
//! [`Mesh`] is what the scene uploads: a vertex list in the [`Vertex`] layout and an index list
//! that is 16-bit whenever the vertex count allows it.
//!
//! Meshes come either from the built-in pyramid ([`Mesh::pyramid`]) or from a Wavefront OBJ file
//! read by [`ObjModelLoader`]. The loader produces a [`ModelData`] with separate attribute arrays,
//! where each distinct `(position, normal, texcoord)` triple appears once and faces refer to it
//! by index.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;

use crate::vertex::{Vertex, PYRAMID_INDICES, PYRAMID_VERTICES};

/// Deduplicated mesh attributes as read from a model file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelData {
    /// `x, y, z` per vertex.
    pub positions: Vec<f32>,
    /// `x, y, z` per vertex. `(0, 0, 1)` where the file gives none.
    pub normals: Vec<f32>,
    /// `u, v` per vertex. `(0, 0)` where the file gives none.
    pub texcoords: Vec<f32>,
    pub indices: Vec<u32>,
}

impl ModelData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }
}

#[derive(Error, Debug)]
pub enum ObjError {
    #[error("Could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },
}

fn parse_floats<const N: usize>(
    fields: std::str::SplitWhitespace<'_>,
    line: usize,
) -> Result<[f32; N], ObjError> {
    let mut values = [0.0; N];
    let mut count = 0;
    for field in fields.take(N) {
        values[count] = field.parse().map_err(|_| ObjError::Parse {
            line,
            message: format!("`{field}` is not a number"),
        })?;
        count += 1;
    }
    if count < N {
        return Err(ObjError::Parse {
            line,
            message: format!("expected {N} numbers, found {count}"),
        });
    }
    Ok(values)
}

/// Resolves a 1-based (or negative, counted from the end) OBJ index.
fn resolve(field: &str, len: usize, line: usize) -> Result<usize, ObjError> {
    let bad = || ObjError::Parse {
        line,
        message: format!("bad index `{field}`"),
    };
    let index: i64 = field.parse().map_err(|_| bad())?;
    let resolved = match index {
        0 => return Err(bad()),
        i if i > 0 => i - 1,
        i => len as i64 + i,
    };
    usize::try_from(resolved)
        .ok()
        .filter(|&index| index < len)
        .ok_or_else(bad)
}

/// Parses OBJ text. Polygons are split into triangle fans; groups, objects and materials are
/// ignored.
pub fn parse_obj(source: &str) -> Result<ModelData, ObjError> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut texcoords: Vec<[f32; 2]> = Vec::new();

    let mut model = ModelData::default();
    // Exact bit patterns of position, normal and texcoord.
    let mut unique: HashMap<[u32; 8], u32> = HashMap::new();

    for (number, text) in source.lines().enumerate() {
        let line = number + 1;
        let mut fields = text.split_whitespace();
        match fields.next() {
            Some("v") => positions.push(parse_floats(fields, line)?),
            Some("vn") => normals.push(parse_floats(fields, line)?),
            Some("vt") => texcoords.push(parse_floats(fields, line)?),
            Some("f") => {
                let mut corners = Vec::new();
                for corner in fields {
                    let mut parts = corner.split('/');
                    let position_field = parts.next().unwrap_or(corner);
                    let position = positions[resolve(position_field, positions.len(), line)?];
                    let texcoord = match parts.next() {
                        Some(field) if !field.is_empty() => {
                            texcoords[resolve(field, texcoords.len(), line)?]
                        }
                        _ => [0.0, 0.0],
                    };
                    let normal = match parts.next() {
                        Some(field) if !field.is_empty() => {
                            normals[resolve(field, normals.len(), line)?]
                        }
                        _ => [0.0, 0.0, 1.0],
                    };

                    let key = [
                        position[0].to_bits(),
                        position[1].to_bits(),
                        position[2].to_bits(),
                        normal[0].to_bits(),
                        normal[1].to_bits(),
                        normal[2].to_bits(),
                        texcoord[0].to_bits(),
                        texcoord[1].to_bits(),
                    ];
                    let next = model.vertex_count() as u32;
                    let index = *unique.entry(key).or_insert_with(|| {
                        model.positions.extend_from_slice(&position);
                        model.normals.extend_from_slice(&normal);
                        model.texcoords.extend_from_slice(&texcoord);
                        next
                    });
                    corners.push(index);
                }
                if corners.len() < 3 {
                    return Err(ObjError::Parse {
                        line,
                        message: format!("face with {} corners", corners.len()),
                    });
                }
                for i in 1..corners.len() - 1 {
                    model
                        .indices
                        .extend_from_slice(&[corners[0], corners[i], corners[i + 1]]);
                }
            }
            _ => {}
        }
    }
    Ok(model)
}

/// Loads an OBJ file without blocking the caller.
#[derive(Debug, Clone)]
pub struct ObjModelLoader {
    path: PathBuf,
}

impl ObjModelLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads and parses the file on a worker thread.
    ///
    /// Resolves to `None` when the file is missing or malformed; the reason is logged.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load(&self) -> impl Future<Output = Option<ModelData>> + Send + 'static {
        let (sender, receiver) = futures::channel::oneshot::channel();
        let path = self.path.clone();
        std::thread::spawn(move || {
            let result = std::fs::read_to_string(&path)
                .map_err(|source| ObjError::Io {
                    path: path.clone(),
                    source,
                })
                .and_then(|text| parse_obj(&text));
            let model = match result {
                Ok(model) => {
                    log::info!(
                        "Loaded {}: {} vertices, {} indices",
                        path.display(),
                        model.vertex_count(),
                        model.indices.len()
                    );
                    Some(model)
                }
                Err(err) => {
                    log::error!("Obj file load failed: {err}");
                    None
                }
            };
            // The receiver may be gone if the caller lost interest.
            let _ = sender.send(model);
        });
        async move { receiver.await.ok().flatten() }
    }

    #[cfg(target_arch = "wasm32")]
    pub fn load(&self) -> impl Future<Output = Option<ModelData>> + 'static {
        log::error!(
            "Obj file load failed: no file system to read {}",
            self.path.display()
        );
        std::future::ready(None)
    }
}

/// Index list in the narrowest format that can address every vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshIndices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: MeshIndices,
}

impl Mesh {
    /// Square-based pyramid: 5 vertices, 6 triangles.
    pub fn pyramid() -> Self {
        Self {
            vertices: PYRAMID_VERTICES.to_vec(),
            indices: MeshIndices::U16(PYRAMID_INDICES.to_vec()),
        }
    }

    /// Converts loaded model data, coloring each vertex by its normal.
    ///
    /// Returns `None` for a model without triangles.
    pub fn from_model(model: &ModelData) -> Option<Self> {
        if model.indices.is_empty() {
            return None;
        }
        let vertices = model
            .positions
            .chunks_exact(3)
            .zip(model.normals.chunks_exact(3))
            .map(|(position, normal)| {
                Vertex::new(
                    [position[0], position[1], position[2]],
                    [
                        normal[0] * 0.5 + 0.5,
                        normal[1] * 0.5 + 0.5,
                        normal[2] * 0.5 + 0.5,
                    ],
                )
            })
            .collect::<Vec<_>>();
        let indices = if vertices.len() <= usize::from(u16::MAX) {
            MeshIndices::U16(model.indices.iter().map(|&index| index as u16).collect())
        } else {
            MeshIndices::U32(model.indices.clone())
        };
        Some(Self { vertices, indices })
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        match &self.indices {
            MeshIndices::U16(indices) => bytemuck::cast_slice(indices),
            MeshIndices::U32(indices) => bytemuck::cast_slice(indices),
        }
    }

    pub fn index_count(&self) -> u32 {
        match &self.indices {
            MeshIndices::U16(indices) => indices.len() as u32,
            MeshIndices::U32(indices) => indices.len() as u32,
        }
    }

    pub fn index_format(&self) -> wgpu::IndexFormat {
        match self.indices {
            MeshIndices::U16(_) => wgpu::IndexFormat::Uint16,
            MeshIndices::U32(_) => wgpu::IndexFormat::Uint32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "\
# two triangles sharing an edge
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vn 0 0 1
f 1//1 2//1 3//1
f 1//1 3//1 4//1
";

    #[test]
    fn test_shared_corners_are_deduplicated() {
        let model = parse_obj(QUAD).unwrap();
        assert_eq!(model.vertex_count(), 4);
        assert_eq!(model.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(model.texcoords.len(), 8);
    }

    #[test]
    fn test_different_normals_split_vertices() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvn 0 0 1\nvn 0 0 -1\nf 1//1 2//1 3//1\nf 1//2 3//2 2//2\n";
        let model = parse_obj(source).unwrap();
        assert_eq!(model.vertex_count(), 6);
    }

    #[test]
    fn test_polygon_is_fanned() {
        let model = parse_obj("v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n").unwrap();
        assert_eq!(model.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(&model.normals[0..3], &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_negative_indices_count_from_end() {
        let model = parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n").unwrap();
        assert_eq!(model.indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_out_of_range_index_is_an_error() {
        let result = parse_obj("v 0 0 0\nf 1 2 3\n");
        assert!(matches!(result, Err(ObjError::Parse { line: 2, .. })));
    }

    #[test]
    fn test_pyramid_buffer_sizes() {
        let mesh = Mesh::pyramid();
        assert_eq!(mesh.vertex_bytes().len(), 5 * 6 * 4);
        assert_eq!(mesh.index_bytes().len(), 18 * 2);
        assert_eq!(mesh.index_format(), wgpu::IndexFormat::Uint16);
        assert_eq!(mesh.index_count(), 18);
    }

    #[test]
    fn test_from_model_colors_by_normal() {
        let mesh = Mesh::from_model(&parse_obj(QUAD).unwrap()).unwrap();
        assert_eq!(mesh.vertices[0].color, [0.5, 0.5, 1.0]);
        assert_eq!(mesh.index_count(), 6);
        assert!(Mesh::from_model(&ModelData::default()).is_none());
    }

    #[test]
    fn test_missing_file_loads_as_none() {
        let loader = ObjModelLoader::new("does/not/exist.obj");
        assert_eq!(pollster::block_on(loader.load()), None);
    }

    #[test]
    fn test_load_reads_file_on_worker() {
        let path = std::env::temp_dir().join(format!("pyramid_mesh_{}.obj", std::process::id()));
        std::fs::write(&path, QUAD).unwrap();

        let model = pollster::block_on(ObjModelLoader::new(&path).load());
        std::fs::remove_file(&path).unwrap();

        assert_eq!(model.map(|model| model.indices.len()), Some(6));
    }
}
