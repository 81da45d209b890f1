//! XML形式のSDTSトランスファー読み込み。
//!
//! モジュール一覧（カタログ）だけを最初に走査し、各モジュールのレコードは
//! リーダーが要求した時点でモジュール先頭から順に解析する。
//!
//! ```xml
//! <Transfer name="sample">
//!   <Module name="LE01" type="line">
//!     <Line record="1" startNode="NO01:1" endNode="NO01:2"
//!           leftPolygon="PC01:2" rightPolygon="PC01:1" attributes="AHPR:3">
//!       <Coordinates>0,0 1,0 1,1</Coordinates>
//!     </Line>
//!   </Module>
//!   <Module name="PC01" type="polygon">
//!     <Polygon record="1"/>
//!   </Module>
//! </Transfer>
//! ```

use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info};

use crate::config::ReaderConfig;
use crate::error::{Result, SdtsError};
use crate::model::{ArcRecord, ModId, Point3, PolygonFeature};
use crate::polygon::{LineReader, PolygonReader};
use crate::source::RecordSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerType {
    Line,
    Polygon,
    Point,
    Attribute,
    Unknown,
}

impl LayerType {
    fn from_attr(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "line" => LayerType::Line,
            "polygon" => LayerType::Polygon,
            "point" => LayerType::Point,
            "attribute" => LayerType::Attribute,
            _ => LayerType::Unknown,
        }
    }
}

/// カタログ上のモジュール
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    pub name: String,
    pub layer_type: LayerType,
    /// `<Module` 開始タグのバイト位置
    offset: usize,
}

pub struct Transfer {
    name: String,
    text: Rc<str>,
    modules: Vec<ModuleEntry>,
}

impl Transfer {
    pub fn open(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        Ok(Self::from_xml(text)?.named_if_empty(stem))
    }

    /// name属性が無いトランスファーにファイル名由来の名前を付ける
    pub(crate) fn named_if_empty(mut self, fallback: &str) -> Self {
        if self.name.is_empty() {
            self.name = fallback.to_string();
        }
        self
    }

    /// カタログを走査してトランスファーを作る
    pub fn from_xml(text: impl Into<String>) -> Result<Self> {
        let text: Rc<str> = Rc::from(text.into());
        let mut reader = Reader::from_str(&text);
        reader.config_mut().trim_text(true);

        let mut name = String::new();
        let mut modules: Vec<ModuleEntry> = Vec::new();

        loop {
            let offset = position(&reader)?;
            let (e, has_body) = match reader.read_event()? {
                Event::Start(e) => (e, true),
                Event::Empty(e) => (e, false),
                Event::Eof => break,
                _ => continue,
            };

            match e.local_name().as_ref() {
                b"Transfer" => {
                    name = attribute(&e, b"name")?.unwrap_or_default();
                    continue;
                }
                b"Module" => {
                    let module = attribute(&e, b"name")?.ok_or_else(|| {
                        SdtsError::Parse("Module element without name".to_string())
                    })?;
                    if modules
                        .iter()
                        .any(|m| m.name.eq_ignore_ascii_case(&module))
                    {
                        return Err(SdtsError::Parse(format!(
                            "module {} appears twice in the catalog",
                            module
                        )));
                    }
                    let layer_type = attribute(&e, b"type")?
                        .map(|t| LayerType::from_attr(&t))
                        .unwrap_or(LayerType::Unknown);
                    debug!("Catalog module {} ({:?}) at {}", module, layer_type, offset);
                    modules.push(ModuleEntry {
                        name: module,
                        layer_type,
                        offset,
                    });
                }
                _ => {}
            }

            // モジュールの中身はここでは読まない
            if has_body {
                reader.read_to_end(e.name())?;
            }
        }

        info!("Read transfer '{}' with {} modules", name, modules.len());

        Ok(Self {
            name,
            text,
            modules,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn modules(&self) -> &[ModuleEntry] {
        &self.modules
    }

    fn find_module(&self, module: &str) -> Option<&ModuleEntry> {
        self.modules
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(module))
    }

    pub fn layer_type(&self, module: &str) -> Option<LayerType> {
        self.find_module(module).map(|m| m.layer_type)
    }

    pub fn modules_of_type(&self, layer_type: LayerType) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|m| m.layer_type == layer_type)
            .map(|m| m.name.as_str())
            .collect()
    }

    fn typed_module(&self, module: &str, layer_type: LayerType) -> Result<&ModuleEntry> {
        self.find_module(module)
            .filter(|m| m.layer_type == layer_type)
            .ok_or_else(|| SdtsError::UnknownModule(module.to_string()))
    }

    pub fn line_source(&self, module: &str) -> Result<XmlLineSource> {
        let entry = self.typed_module(module, LayerType::Line)?;
        Ok(XmlLineSource {
            cursor: ModuleCursor::new(Rc::clone(&self.text), entry),
        })
    }

    pub fn polygon_source(&self, module: &str) -> Result<XmlPolygonSource> {
        let entry = self.typed_module(module, LayerType::Polygon)?;
        Ok(XmlPolygonSource {
            cursor: ModuleCursor::new(Rc::clone(&self.text), entry),
        })
    }

    pub fn line_readers(&self, config: &ReaderConfig) -> Result<Vec<LineReader<XmlLineSource>>> {
        self.modules_of_type(LayerType::Line)
            .into_iter()
            .map(|module| Ok(LineReader::new(self.line_source(module)?, config)))
            .collect()
    }

    pub fn polygon_reader(
        &self,
        module: &str,
        config: &ReaderConfig,
    ) -> Result<PolygonReader<XmlPolygonSource>> {
        Ok(PolygonReader::new(self.polygon_source(module)?, config))
    }

    /// ポリゴンモジュールを参照しているラインだけを使ってリングを組み立てる
    pub fn assemble_polygons(
        &self,
        module: &str,
        config: &ReaderConfig,
    ) -> Result<PolygonReader<XmlPolygonSource>> {
        let mut polygons = self.polygon_reader(module, config)?;

        let mut lines = Vec::new();
        for mut line in self.line_readers(config)? {
            let references = line.cache_mut().scan_module_references()?;
            if references.iter().any(|m| m.eq_ignore_ascii_case(module)) {
                lines.push(line);
            } else {
                debug!(
                    "Line module {} does not reference {}, skipping",
                    line.module(),
                    module
                );
            }
        }

        polygons.assemble_rings(&mut lines)?;
        Ok(polygons)
    }
}

/// 1モジュール分のレコードを前から順に読むカーソル
struct ModuleCursor {
    text: Rc<str>,
    module: String,
    start: usize,
    cursor: usize,
    done: bool,
}

impl ModuleCursor {
    fn new(text: Rc<str>, entry: &ModuleEntry) -> Self {
        Self {
            text,
            module: entry.name.clone(),
            start: entry.offset,
            cursor: entry.offset,
            done: false,
        }
    }

    fn rewind(&mut self) {
        self.cursor = self.start;
        self.done = false;
    }

    /// 次の `tag` 要素を `parse` で解析する。モジュール終端で `None`。
    fn next_record<T, F>(&mut self, tag: &[u8], mut parse: F) -> Result<Option<T>>
    where
        F: FnMut(&mut Reader<&[u8]>, &BytesStart<'_>, bool) -> Result<T>,
    {
        if self.done {
            return Ok(None);
        }

        let text = Rc::clone(&self.text);
        let mut reader = Reader::from_str(&text[self.cursor..]);
        reader.config_mut().trim_text(true);
        reader.config_mut().check_end_names = false;

        loop {
            match reader.read_event()? {
                Event::Start(e) if e.local_name().as_ref() == b"Module" => {}
                Event::Empty(e) if e.local_name().as_ref() == b"Module" => break,
                Event::End(e) if e.local_name().as_ref() == b"Module" => break,
                Event::Start(e) if e.local_name().as_ref() == tag => {
                    let record = parse(&mut reader, &e, true)?;
                    self.cursor += position(&reader)?;
                    return Ok(Some(record));
                }
                Event::Empty(e) if e.local_name().as_ref() == tag => {
                    let record = parse(&mut reader, &e, false)?;
                    self.cursor += position(&reader)?;
                    return Ok(Some(record));
                }
                Event::Start(e) => {
                    reader.read_to_end(e.name())?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        self.done = true;
        Ok(None)
    }
}

pub struct XmlLineSource {
    cursor: ModuleCursor,
}

impl RecordSource for XmlLineSource {
    type Record = ArcRecord;

    fn module(&self) -> &str {
        &self.cursor.module
    }

    fn read_next(&mut self) -> Result<Option<ArcRecord>> {
        let module = self.cursor.module.clone();
        self.cursor
            .next_record(b"Line", |reader, start, has_body| {
                parse_line(reader, start, has_body, &module)
            })
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor.rewind();
        Ok(())
    }
}

pub struct XmlPolygonSource {
    cursor: ModuleCursor,
}

impl RecordSource for XmlPolygonSource {
    type Record = PolygonFeature;

    fn module(&self) -> &str {
        &self.cursor.module
    }

    fn read_next(&mut self) -> Result<Option<PolygonFeature>> {
        let module = self.cursor.module.clone();
        self.cursor
            .next_record(b"Polygon", |reader, start, has_body| {
                let mut polygon = PolygonFeature::new(record_id(start, &module)?);
                polygon.attributes = mod_id_list(start, b"attributes")?;
                if has_body {
                    reader.read_to_end(start.name())?;
                }
                Ok(polygon)
            })
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor.rewind();
        Ok(())
    }
}

fn parse_line(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
    has_body: bool,
    module: &str,
) -> Result<ArcRecord> {
    let id = record_id(start, module)?;
    let mut line = ArcRecord::new(
        id,
        Vec::new(),
        optional_mod_id(start, b"startNode")?,
        optional_mod_id(start, b"endNode")?,
    )
    .with_polygons(
        optional_mod_id(start, b"leftPolygon")?,
        optional_mod_id(start, b"rightPolygon")?,
    );
    line.attributes = mod_id_list(start, b"attributes")?;

    if !has_body {
        return Ok(line);
    }

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"Coordinates" => {
                let text = reader.read_text(e.name())?;
                line.vertices.extend(parse_coordinates(&text)?);
            }
            Event::End(e) if e.local_name().as_ref() == b"Line" => break,
            Event::Start(e) => {
                reader.read_to_end(e.name())?;
            }
            Event::Eof => {
                return Err(SdtsError::Parse(format!(
                    "unexpected end of document inside line {}",
                    line.id
                )))
            }
            _ => {}
        }
    }

    Ok(line)
}

/// `x,y[,z]` の組を空白区切りで並べたものを解析する
pub fn parse_coordinates(text: &str) -> Result<Vec<Point3>> {
    text.split_whitespace()
        .map(|tuple| {
            let values = tuple
                .split(',')
                .map(|v| {
                    v.trim().parse::<f64>().map_err(|e| {
                        SdtsError::Parse(format!("invalid coordinate '{}': {}", tuple, e))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;

            match values.as_slice() {
                [x, y] => Ok(Point3::xy(*x, *y)),
                [x, y, z] => Ok(Point3::new(*x, *y, *z)),
                _ => Err(SdtsError::Parse(format!(
                    "expected x,y or x,y,z, got '{}'",
                    tuple
                ))),
            }
        })
        .collect()
}

fn position(reader: &Reader<&[u8]>) -> Result<usize> {
    usize::try_from(reader.buffer_position())
        .map_err(|_| SdtsError::Parse("document offset does not fit in memory".to_string()))
}

fn attribute(start: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == key {
            let value: Cow<'_, str> = attr.unescape_value()?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn record_id(start: &BytesStart<'_>, module: &str) -> Result<ModId> {
    let value = attribute(start, b"record")?.ok_or_else(|| {
        SdtsError::Parse(format!("record in module {} has no record number", module))
    })?;
    let record = value.trim().parse::<i32>().map_err(|e| {
        SdtsError::Parse(format!(
            "invalid record number '{}' in module {}: {}",
            value, module, e
        ))
    })?;
    Ok(ModId::new(module, record))
}

fn optional_mod_id(start: &BytesStart<'_>, key: &[u8]) -> Result<ModId> {
    match attribute(start, key)? {
        Some(value) if !value.trim().is_empty() => value.parse(),
        _ => Ok(ModId::unset()),
    }
}

fn mod_id_list(start: &BytesStart<'_>, key: &[u8]) -> Result<Vec<ModId>> {
    match attribute(start, key)? {
        Some(value) => value.split_whitespace().map(str::parse).collect(),
        None => Ok(Vec::new()),
    }
}
