//! CVAT-style annotation loading and plate cropping.

use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::{Path, PathBuf};

use crate::ocr::clean_text;

const PLATE_LABEL: &str = "plate";
const PLATE_ATTRIBUTE: &str = "plate number";

/// Box corners as written in the annotation file; relative when every
/// coordinate is at most 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateBox {
    pub xtl: f32,
    pub ytl: f32,
    pub xbr: f32,
    pub ybr: f32,
}

impl PlateBox {
    fn is_relative(&self) -> bool {
        [self.xtl, self.ytl, self.xbr, self.ybr]
            .iter()
            .all(|&v| v <= 1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetEntry {
    pub file_name: String,
    pub path: PathBuf,
    pub plate_box: PlateBox,
    /// Expected plate text, already cleaned
    pub expected: String,
}

pub fn load_annotations(xml_path: &Path, images_dir: &Path) -> Result<Vec<DatasetEntry>> {
    let xml = std::fs::read_to_string(xml_path)
        .context(format!("Failed to read annotations: {}", xml_path.display()))?;
    parse_annotations(&xml, images_dir)
}

#[derive(Default)]
struct ImageState {
    name: Option<String>,
    seen_box: bool,
    plate_box: Option<PlateBox>,
    in_plate_box: bool,
    in_plate_attribute: bool,
    text: Option<String>,
}

/// Parses `<image>` elements. Only the first `<box>` of each image counts, and
/// only when it is labelled as a plate and carries non-empty plate text.
pub fn parse_annotations(xml: &str, images_dir: &Path) -> Result<Vec<DatasetEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut state: Option<ImageState> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"image" => {
                    state = Some(ImageState {
                        name: attribute(&e, "name")?,
                        ..Default::default()
                    });
                }
                b"box" => {
                    if let Some(image) = state.as_mut() {
                        image.in_plate_box = open_box(image, &e)?;
                    }
                }
                b"attribute" => {
                    if let Some(image) = state.as_mut()
                        && image.in_plate_box
                    {
                        image.in_plate_attribute =
                            attribute(&e, "name")?.as_deref() == Some(PLATE_ATTRIBUTE);
                    }
                }
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"image" => {}
                b"box" => {
                    if let Some(image) = state.as_mut() {
                        open_box(image, &e)?;
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if let Some(image) = state.as_mut()
                    && image.in_plate_attribute
                {
                    image.text = Some(t.unescape()?.into_owned());
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"image" => {
                    if let Some(entry) = state.take().and_then(|s| finish_image(s, images_dir)) {
                        entries.push(entry);
                    }
                }
                b"box" => {
                    if let Some(image) = state.as_mut() {
                        image.in_plate_box = false;
                    }
                }
                b"attribute" => {
                    if let Some(image) = state.as_mut() {
                        image.in_plate_attribute = false;
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

/// Records the image's first box. Returns whether it is the plate box.
fn open_box(image: &mut ImageState, e: &BytesStart) -> Result<bool> {
    if image.seen_box {
        return Ok(false);
    }
    image.seen_box = true;

    if attribute(e, "label")?.as_deref() != Some(PLATE_LABEL) {
        return Ok(false);
    }
    let coord = |name: &str| -> Result<f32> {
        let value = attribute(e, name)?.unwrap_or_default();
        value
            .trim()
            .parse()
            .context(format!("Invalid box coordinate {}={:?}", name, value))
    };
    image.plate_box = Some(PlateBox {
        xtl: coord("xtl")?,
        ytl: coord("ytl")?,
        xbr: coord("xbr")?,
        ybr: coord("ybr")?,
    });
    Ok(true)
}

fn finish_image(state: ImageState, images_dir: &Path) -> Option<DatasetEntry> {
    let file_name = state.name?;
    let plate_box = state.plate_box?;
    let expected = clean_text(&state.text?);
    if expected.is_empty() {
        return None;
    }
    Some(DatasetEntry {
        path: images_dir.join(&file_name),
        file_name,
        plate_box,
        expected,
    })
}

fn attribute(e: &BytesStart, name: &str) -> Result<Option<String>> {
    match e.try_get_attribute(name)? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// Crops the annotated plate, clamped to the image, then trims `margin` of
/// the crop's size from every side. Keeps the untrimmed crop when trimming
/// would empty it; `None` when the box misses the image.
pub fn crop_plate(img: &RgbImage, plate_box: PlateBox, margin: f32) -> Option<RgbImage> {
    let (w, h) = img.dimensions();
    let (x1, y1, x2, y2) = if plate_box.is_relative() {
        (
            (plate_box.xtl * w as f32) as i64,
            (plate_box.ytl * h as f32) as i64,
            (plate_box.xbr * w as f32) as i64,
            (plate_box.ybr * h as f32) as i64,
        )
    } else {
        (
            plate_box.xtl as i64,
            plate_box.ytl as i64,
            plate_box.xbr as i64,
            plate_box.ybr as i64,
        )
    };

    let x1 = x1.clamp(0, w as i64) as u32;
    let y1 = y1.clamp(0, h as i64) as u32;
    let x2 = x2.clamp(0, w as i64) as u32;
    let y2 = y2.clamp(0, h as i64) as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    let raw = imageops::crop_imm(img, x1, y1, x2 - x1, y2 - y1).to_image();

    let (rw, rh) = raw.dimensions();
    let mx0 = (rw as f32 * margin) as u32;
    let mx1 = (rw as f32 * (1.0 - margin)) as u32;
    let my0 = (rh as f32 * margin) as u32;
    let my1 = (rh as f32 * (1.0 - margin)) as u32;
    if mx1 <= mx0 || my1 <= my0 {
        return Some(raw);
    }
    Some(imageops::crop_imm(&raw, mx0, my0, mx1 - mx0, my1 - my0).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    const ANNOTATIONS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<annotations>
  <version>1.1</version>
  <image id="0" name="car_a.jpg" width="640" height="480">
    <box label="plate" occluded="0" xtl="100.5" ytl="200" xbr="300" ybr="260">
      <attribute name="plate number">kr 12345</attribute>
    </box>
  </image>
  <image id="1" name="car_b.jpg" width="640" height="480">
    <box label="car" xtl="0" ytl="0" xbr="600" ybr="400"></box>
    <box label="plate" xtl="10" ytl="10" xbr="50" ybr="30">
      <attribute name="plate number">WA1</attribute>
    </box>
  </image>
  <image id="2" name="car_c.jpg" width="640" height="480">
    <box label="plate" xtl="0.1" ytl="0.2" xbr="0.5" ybr="0.4">
      <attribute name="color">white</attribute>
      <attribute name="plate number">SK &amp; 0234A</attribute>
    </box>
  </image>
  <image id="3" name="car_d.jpg" width="640" height="480">
    <box label="plate" xtl="1" ytl="2" xbr="3" ybr="4"/>
  </image>
  <image id="4" name="car_e.jpg" width="640" height="480"/>
  <image id="5" name="car_f.jpg" width="640" height="480">
    <box label="plate" xtl="1" ytl="2" xbr="3" ybr="4">
      <attribute name="plate number">--</attribute>
    </box>
  </image>
</annotations>
"#;

    #[test]
    fn test_parse_annotations() {
        let entries = parse_annotations(ANNOTATIONS, Path::new("/data/images")).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].file_name, "car_a.jpg");
        assert_eq!(entries[0].path, PathBuf::from("/data/images/car_a.jpg"));
        assert_eq!(entries[0].expected, "KR12345");
        assert_eq!(
            entries[0].plate_box,
            PlateBox {
                xtl: 100.5,
                ytl: 200.0,
                xbr: 300.0,
                ybr: 260.0
            }
        );

        assert_eq!(entries[1].file_name, "car_c.jpg");
        assert_eq!(entries[1].expected, "SK0234A");
    }

    #[test]
    fn test_load_annotations_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("annotations.xml");
        std::fs::write(&path, ANNOTATIONS).unwrap();

        let entries = load_annotations(&path, dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(load_annotations(&dir.path().join("missing.xml"), dir.path()).is_err());
    }

    #[test]
    fn test_crop_absolute_box_with_margin() {
        let img = RgbImage::from_pixel(640, 480, Rgb([0, 0, 0]));
        let plate_box = PlateBox {
            xtl: 100.0,
            ytl: 200.0,
            xbr: 300.0,
            ybr: 250.0,
        };
        let crop = crop_plate(&img, plate_box, 0.02).unwrap();
        // 200x50 raw, trimmed by 4px and 1px on each side.
        assert_eq!(crop.dimensions(), (192, 48));
    }

    #[test]
    fn test_crop_relative_box() {
        let img = RgbImage::from_pixel(200, 100, Rgb([0, 0, 0]));
        let plate_box = PlateBox {
            xtl: 0.25,
            ytl: 0.5,
            xbr: 0.75,
            ybr: 1.0,
        };
        let crop = crop_plate(&img, plate_box, 0.0).unwrap();
        assert_eq!(crop.dimensions(), (100, 50));
    }

    #[test]
    fn test_crop_clamps_and_rejects() {
        let img = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let overhanging = PlateBox {
            xtl: -20.0,
            ytl: 90.0,
            xbr: 40.0,
            ybr: 200.0,
        };
        let crop = crop_plate(&img, overhanging, 0.0).unwrap();
        assert_eq!(crop.dimensions(), (40, 10));

        let outside = PlateBox {
            xtl: 150.0,
            ytl: 150.0,
            xbr: 180.0,
            ybr: 190.0,
        };
        assert!(crop_plate(&img, outside, 0.02).is_none());
    }

    #[test]
    fn test_tiny_crop_keeps_untrimmed() {
        let img = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let tiny = PlateBox {
            xtl: 10.0,
            ytl: 10.0,
            xbr: 11.0,
            ybr: 11.0,
        };
        let crop = crop_plate(&img, tiny, 0.45).unwrap();
        assert_eq!(crop.dimensions(), (1, 1));
    }
}
