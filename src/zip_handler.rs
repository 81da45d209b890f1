use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::parser::Transfer;

/// ZIPで配布されたトランスファー群を読む
pub struct ZipHandler {
    path: PathBuf,
}

impl ZipHandler {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_archive(&self) -> Result<zip::ZipArchive<File>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open ZIP file: {:?}", self.path))?;
        zip::ZipArchive::new(file)
            .with_context(|| format!("Failed to read ZIP archive: {:?}", self.path))
    }

    /// アーカイブ内のXMLエントリ名
    pub fn transfer_entries(&self) -> Result<Vec<String>> {
        let mut archive = self.open_archive()?;
        let mut names = Vec::new();

        for i in 0..archive.len() {
            let entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;
            if entry.is_file() && is_xml(entry.name()) {
                names.push(entry.name().to_string());
            }
        }

        Ok(names)
    }

    /// XMLエントリをすべてトランスファーとして開く
    pub fn transfers(&self) -> Result<Vec<Transfer>> {
        let mut archive = self.open_archive()?;
        let mut transfers = Vec::new();

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;

            if !entry.is_file() || !is_xml(entry.name()) {
                debug!("Skipping ZIP entry: {}", entry.name());
                continue;
            }

            let name = entry.name().to_string();
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .with_context(|| format!("Failed to read {} from {:?}", name, self.path))?;

            let stem = Path::new(&name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("transfer");
            let transfer = Transfer::from_xml(text)
                .with_context(|| format!("Failed to parse {} in {:?}", name, self.path))?
                .named_if_empty(stem);

            transfers.push(transfer);
        }

        info!(
            "Found {} transfers in {:?}",
            transfers.len(),
            self.path
        );

        Ok(transfers)
    }
}

fn is_xml(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    const TRANSFER: &str = r#"<Transfer>
  <Module name="LE01" type="line">
    <Line record="1" startNode="NO01:1" endNode="NO01:1" leftPolygon="PC01:1">
      <Coordinates>0,0 1,0 0,1 0,0</Coordinates>
    </Line>
  </Module>
  <Module name="PC01" type="polygon">
    <Polygon record="1"/>
  </Module>
</Transfer>"#;

    fn create_test_zip(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("transfers.zip");
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        writer.start_file("data/island.xml", options).unwrap();
        writer.write_all(TRANSFER.as_bytes()).unwrap();
        writer.start_file("README.txt", options).unwrap();
        writer.write_all(b"not a transfer").unwrap();
        writer.finish().unwrap();

        path
    }

    #[test]
    fn test_transfer_entries() {
        let temp_dir = TempDir::new().unwrap();
        let handler = ZipHandler::new(create_test_zip(&temp_dir));

        assert_eq!(handler.transfer_entries().unwrap(), vec!["data/island.xml"]);
    }

    #[test]
    fn test_transfers_from_zip() {
        let temp_dir = TempDir::new().unwrap();
        let handler = ZipHandler::new(create_test_zip(&temp_dir));

        let transfers = handler.transfers().unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].name(), "island");

        let mut polygons = transfers[0]
            .assemble_polygons("PC01", &crate::ReaderConfig::default())
            .unwrap();
        let polygon = polygons.get_polygon(1).unwrap().unwrap();
        assert_eq!(polygon.rings().len(), 1);
        assert_eq!(polygon.rings()[0].len(), 4);
    }

    #[test]
    fn test_missing_zip() {
        let handler = ZipHandler::new("does/not/exist.zip");
        assert!(handler.transfers().is_err());
    }
}
