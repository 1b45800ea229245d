use crate::{Mesh, Result, SessionError};
use depth_camera::sequence::pose_file_name;
use glam::Mat4;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

fn export_err(path: &Path, e: impl std::fmt::Display) -> SessionError {
    SessionError::Export(format!("{}: {e}", path.display()))
}

/// Four rows of four space-separated values.
pub fn format_pose(pose: &Mat4) -> String {
    let mut out = String::new();
    for r in 0..4 {
        let row = pose.row(r);
        let _ = writeln!(out, "{} {} {} {}", row.x, row.y, row.z, row.w);
    }
    out
}

/// Write one `seq_pose%05d.txt` per pose into `dir`, numbered by position.
pub fn write_poses(dir: &Path, poses: &[Mat4]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| export_err(dir, e))?;
    let mut written = Vec::with_capacity(poses.len());
    for (i, pose) in poses.iter().enumerate() {
        let path = dir.join(pose_file_name(i));
        fs::write(&path, format_pose(pose)).map_err(|e| export_err(&path, e))?;
        written.push(path);
    }
    info!(count = written.len(), dir = %dir.display(), "poses written");
    Ok(written)
}

/// Write `mesh` as ASCII PLY.
pub fn export_ply(path: &Path, mesh: &Mesh) -> Result<()> {
    if !mesh.normals.is_empty() && mesh.normals.len() != mesh.vertices.len() {
        return Err(export_err(path, "normal count does not match vertex count"));
    }
    if let Some(colors) = &mesh.colors {
        if colors.len() != mesh.vertices.len() {
            return Err(export_err(path, "color count does not match vertex count"));
        }
    }
    let vertex_count = mesh.vertices.len() as u64;
    if let Some(t) = mesh
        .triangles
        .iter()
        .find(|t| t.iter().any(|&i| u64::from(i) >= vertex_count))
    {
        return Err(export_err(path, format!("triangle {t:?} references a missing vertex")));
    }

    let mut out = String::from("ply\nformat ascii 1.0\n");
    let _ = writeln!(out, "element vertex {}", mesh.vertices.len());
    out.push_str("property float x\nproperty float y\nproperty float z\n");
    if !mesh.normals.is_empty() {
        out.push_str("property float nx\nproperty float ny\nproperty float nz\n");
    }
    if mesh.colors.is_some() {
        out.push_str("property uchar red\nproperty uchar green\nproperty uchar blue\n");
    }
    let _ = writeln!(out, "element face {}", mesh.triangles.len());
    out.push_str("property list uchar int vertex_indices\nend_header\n");

    for (i, v) in mesh.vertices.iter().enumerate() {
        let _ = write!(out, "{} {} {}", v.x, v.y, v.z);
        if let Some(n) = mesh.normals.get(i) {
            let _ = write!(out, " {} {} {}", n.x, n.y, n.z);
        }
        if let Some(c) = mesh.colors.as_ref().and_then(|c| c.get(i)) {
            let _ = write!(out, " {} {} {}", c[0], c[1], c[2]);
        }
        out.push('\n');
    }
    for t in &mesh.triangles {
        let _ = writeln!(out, "3 {} {} {}", t[0], t[1], t[2]);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| export_err(parent, e))?;
    }
    fs::write(path, out).map_err(|e| export_err(path, e))?;
    info!(
        vertices = mesh.vertices.len(),
        triangles = mesh.triangles.len(),
        path = %path.display(),
        "mesh written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn poses_are_written_row_major() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("poses").join("room");
        let pose = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let files = write_poses(&out, &[Mat4::IDENTITY, pose]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[1].ends_with("seq_pose00001.txt"));
        let text = fs::read_to_string(&files[1]).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows, vec!["1 0 0 1", "0 1 0 2", "0 0 1 3", "0 0 0 1"]);
    }

    #[test]
    fn ply_header_follows_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshes").join("room.ply");
        let mesh = Mesh {
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            normals: vec![Vec3::Z; 3],
            colors: Some(vec![[255, 0, 0]; 3]),
            triangles: vec![[0, 1, 2]],
        };
        export_ply(&path, &mesh).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("ply\nformat ascii 1.0\nelement vertex 3\n"));
        assert!(text.contains("property float nx\n"));
        assert!(text.contains("property uchar red\n"));
        assert!(text.contains("element face 1\n"));
        assert!(text.contains("1 0 0 0 0 1 255 0 0\n"));
        assert!(text.ends_with("3 0 1 2\n"));
    }

    #[test]
    fn dangling_triangle_is_an_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = Mesh {
            vertices: vec![Vec3::ZERO],
            triangles: vec![[0, 1, 2]],
            ..Mesh::default()
        };
        assert!(matches!(
            export_ply(&dir.path().join("m.ply"), &mesh),
            Err(SessionError::Export(_))
        ));
    }

    #[test]
    fn unwritable_destination_is_an_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("poses");
        fs::write(&blocker, b"").unwrap();
        assert!(matches!(
            write_poses(&blocker.join("room"), &[Mat4::IDENTITY]),
            Err(SessionError::Export(_))
        ));
    }
}
