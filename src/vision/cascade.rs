//! Haar cascade object detector
//!
//! Reads the boosted cascade XML files shipped with OpenCV
//! (`haarcascade_*.xml`, "new" storage format) and evaluates them with a
//! sliding window over an image pyramid. Upright and 45° tilted Haar
//! features are supported, as are tree-shaped weak classifiers.
//!
//! Raw window hits are merged with the same rectangle grouping OpenCV uses,
//! so `min_neighbors` behaves as it does there.

use image::imageops::{self, FilterType};
use image::GrayImage;
use std::path::Path;

use crate::error::DetectorError;
use crate::vision::{DetectParams, Rect, RegionDetector};

/// Relative tolerance used when grouping overlapping hits
pub const GROUP_EPS: f64 = 0.2;

/// Windows whose normalized standard deviation is this small are skipped
const FLAT_WINDOW_LIMIT: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: i64,
    y: i64,
    width: i64,
    height: i64,
    weight: f64,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
    tilted: bool,
}

impl HaarFeature {
    fn value(&self, integrals: &Integrals, x: i64, y: i64) -> f64 {
        self.rects
            .iter()
            .map(|r| {
                let sum = if self.tilted {
                    integrals.tilted_sum(x + r.x, y + r.y, r.width, r.height)
                } else {
                    integrals.rect_sum(x + r.x, y + r.y, r.width, r.height)
                };
                sum * r.weight
            })
            .sum()
    }
}

/// Split node of a weak classifier tree. Child indices `<= 0` are leaves
/// (`-child` indexes the leaf values).
#[derive(Debug, Clone, Copy)]
struct Node {
    left: i64,
    right: i64,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

impl WeakClassifier {
    fn predict(
        &self,
        features: &[HaarFeature],
        integrals: &Integrals,
        x: i64,
        y: i64,
        inv_norm: f64,
    ) -> f64 {
        let mut idx: i64 = 0;
        loop {
            let node = &self.nodes[idx as usize];
            let value = features[node.feature].value(integrals, x, y) * inv_norm;
            idx = if value < node.threshold {
                node.left
            } else {
                node.right
            };
            if idx <= 0 {
                break;
            }
        }
        self.leaves[(-idx) as usize]
    }
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// A loaded boosted Haar cascade
#[derive(Debug, Clone)]
pub struct CascadeClassifier {
    name: String,
    window: (u32, u32),
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
    has_tilted: bool,
}

impl CascadeClassifier {
    /// Load a cascade from an OpenCV XML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|e| DetectorError::ReadModel {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let cascade = Self::from_xml(&path.display().to_string(), &xml)?;
        tracing::info!(
            "Loaded cascade {} ({}x{} window, {} stages, {} features)",
            path.display(),
            cascade.window.0,
            cascade.window.1,
            cascade.stages.len(),
            cascade.features.len()
        );
        Ok(cascade)
    }

    /// Parse a cascade from XML text. `name` is used in error messages.
    pub fn from_xml(name: &str, xml: &str) -> Result<Self, DetectorError> {
        let parse_err = |message: String| DetectorError::ParseModel {
            path: name.to_string(),
            message,
        };

        let doc = roxmltree::Document::parse(xml).map_err(|e| parse_err(e.to_string()))?;

        let cascade = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| DetectorError::Unsupported {
                path: name.to_string(),
                message: "no <cascade> element (old-style cascades are not supported)"
                    .to_string(),
            })?;

        if let Some(stage_type) = child_text(cascade, "stageType") {
            if stage_type != "BOOST" {
                return Err(DetectorError::Unsupported {
                    path: name.to_string(),
                    message: format!("stage type {}", stage_type),
                });
            }
        }
        if let Some(feature_type) = child_text(cascade, "featureType") {
            if feature_type != "HAAR" {
                return Err(DetectorError::Unsupported {
                    path: name.to_string(),
                    message: format!("feature type {}", feature_type),
                });
            }
        }

        let width = child_number(cascade, "width").map_err(parse_err)? as u32;
        let height = child_number(cascade, "height").map_err(parse_err)? as u32;
        if width < 3 || height < 3 {
            return Err(parse_err(format!("window {}x{} is too small", width, height)));
        }

        let stages_node = child(cascade, "stages")
            .ok_or_else(|| parse_err("missing <stages>".to_string()))?;
        let mut stages = Vec::new();
        for stage_node in items(stages_node) {
            let threshold = child_number(stage_node, "stageThreshold").map_err(parse_err)?;
            let weak_node = child(stage_node, "weakClassifiers")
                .ok_or_else(|| parse_err("stage without <weakClassifiers>".to_string()))?;

            let mut classifiers = Vec::new();
            for weak in items(weak_node) {
                let raw_nodes = child_numbers(weak, "internalNodes").map_err(parse_err)?;
                let leaves = child_numbers(weak, "leafValues").map_err(parse_err)?;
                if raw_nodes.is_empty() || raw_nodes.len() % 4 != 0 {
                    return Err(parse_err(format!(
                        "internalNodes holds {} values, expected groups of 4",
                        raw_nodes.len()
                    )));
                }

                let nodes = raw_nodes
                    .chunks(4)
                    .map(|c| Node {
                        left: c[0] as i64,
                        right: c[1] as i64,
                        feature: c[2] as usize,
                        threshold: c[3],
                    })
                    .collect();
                classifiers.push(WeakClassifier { nodes, leaves });
            }

            stages.push(Stage {
                threshold,
                classifiers,
            });
        }

        let features_node = child(cascade, "features")
            .ok_or_else(|| parse_err("missing <features>".to_string()))?;
        let mut features = Vec::new();
        for feature_node in items(features_node) {
            let rects_node = child(feature_node, "rects")
                .ok_or_else(|| parse_err("feature without <rects>".to_string()))?;
            let mut rects = Vec::new();
            for rect_node in items(rects_node) {
                let values = numbers(rect_node.text().unwrap_or("")).map_err(parse_err)?;
                if values.len() != 5 {
                    return Err(parse_err(format!(
                        "feature rect has {} values, expected 5",
                        values.len()
                    )));
                }
                rects.push(WeightedRect {
                    x: values[0] as i64,
                    y: values[1] as i64,
                    width: values[2] as i64,
                    height: values[3] as i64,
                    weight: values[4],
                });
            }
            let tilted = child_text(feature_node, "tilted")
                .map(|t| t.trim() != "0")
                .unwrap_or(false);
            features.push(HaarFeature { rects, tilted });
        }

        let has_tilted = features.iter().any(|f| f.tilted);
        let classifier = Self {
            name: name.to_string(),
            window: (width, height),
            stages,
            features,
            has_tilted,
        };
        classifier.validate().map_err(parse_err)?;
        Ok(classifier)
    }

    /// Check every index and rectangle so evaluation never goes out of bounds
    fn validate(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err("cascade has no stages".to_string());
        }

        let (ww, wh) = (self.window.0 as i64, self.window.1 as i64);
        for (i, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(format!("feature {} has no rectangles", i));
            }
            for r in &feature.rects {
                let inside = if feature.tilted {
                    r.x >= 0 && r.y >= 0 && r.x + r.width <= ww && r.y + r.width + r.height <= wh
                        && r.x - r.height >= -wh
                } else {
                    r.x >= 0 && r.y >= 0 && r.x + r.width <= ww && r.y + r.height <= wh
                };
                if r.width <= 0 || r.height <= 0 || !inside {
                    return Err(format!("feature {} has a rectangle outside the window", i));
                }
            }
        }

        for (s, stage) in self.stages.iter().enumerate() {
            for weak in &stage.classifiers {
                for node in &weak.nodes {
                    if node.feature >= self.features.len() {
                        return Err(format!(
                            "stage {} references feature {} of {}",
                            s,
                            node.feature,
                            self.features.len()
                        ));
                    }
                    for child in [node.left, node.right] {
                        let valid = if child <= 0 {
                            ((-child) as usize) < weak.leaves.len()
                        } else {
                            (child as usize) < weak.nodes.len()
                        };
                        if !valid {
                            return Err(format!("stage {} has a dangling tree index {}", s, child));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Training window size (width, height)
    pub fn window_size(&self) -> (u32, u32) {
        self.window
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run the cascade over every scale and position, then group hits
    pub fn detect_multi_scale(&self, image: &GrayImage, params: &DetectParams) -> Vec<Rect> {
        if !(params.scale_factor > 1.0) {
            tracing::warn!(
                "Ignoring detection with scale factor {} (must exceed 1.0)",
                params.scale_factor
            );
            return Vec::new();
        }

        let (iw, ih) = image.dimensions();
        let (ww, wh) = self.window;
        let mut candidates = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let win_w = (ww as f64 * factor).round() as u32;
            let win_h = (wh as f64 * factor).round() as u32;
            let sw = (iw as f64 / factor).round() as u32;
            let sh = (ih as f64 / factor).round() as u32;

            if sw <= ww || sh <= wh || win_w > iw || win_h > ih {
                break;
            }

            if win_w >= params.min_size.0 && win_h >= params.min_size.1 {
                let resized;
                let scaled = if sw == iw && sh == ih {
                    image
                } else {
                    resized = imageops::resize(image, sw, sh, FilterType::Triangle);
                    &resized
                };

                let integrals = Integrals::new(scaled, self.has_tilted);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..(sh - wh)).step_by(step) {
                    for x in (0..(sw - ww)).step_by(step) {
                        if self.classify(&integrals, x as i64, y as i64) {
                            candidates.push(Rect::new(
                                (x as f64 * factor).round() as u32,
                                (y as f64 * factor).round() as u32,
                                win_w,
                                win_h,
                            ));
                        }
                    }
                }
            }

            factor *= params.scale_factor;
        }

        tracing::trace!("{}: {} raw hits", self.name, candidates.len());
        group_rectangles(candidates, params.min_neighbors, GROUP_EPS)
    }

    /// Evaluate every stage for the window whose top-left corner is (x, y)
    fn classify(&self, integrals: &Integrals, x: i64, y: i64) -> bool {
        let (ww, wh) = (self.window.0 as i64, self.window.1 as i64);
        let area = ((ww - 2) * (wh - 2)) as f64;
        let sum = integrals.rect_sum(x + 1, y + 1, ww - 2, wh - 2);
        let sq_sum = integrals.rect_sq_sum(x + 1, y + 1, ww - 2, wh - 2);

        let norm = area * sq_sum - sum * sum;
        if norm <= 0.0 {
            return false;
        }
        let inv_norm = 1.0 / norm.sqrt();
        if area * inv_norm >= FLAT_WINDOW_LIMIT {
            return false;
        }

        for stage in &self.stages {
            let score: f64 = stage
                .classifiers
                .iter()
                .map(|weak| weak.predict(&self.features, integrals, x, y, inv_norm))
                .sum();
            if score < stage.threshold {
                return false;
            }
        }
        true
    }
}

impl RegionDetector for CascadeClassifier {
    fn detect(&self, image: &GrayImage, params: &DetectParams) -> Vec<Rect> {
        self.detect_multi_scale(image, params)
    }
}

/// Summed-area tables for one pyramid level
struct Integrals {
    stride: usize,
    sum: Vec<f64>,
    sq_sum: Vec<f64>,
    /// 45° rotated table, padded horizontally by `tilted_pad` columns
    tilted: Vec<f64>,
    tilted_pad: i64,
    tilted_stride: usize,
}

impl Integrals {
    fn new(image: &GrayImage, with_tilted: bool) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq_sum = vec![0.0; stride * (h + 1)];

        for y in 0..h {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = image.get_pixel(x as u32, y as u32).0[0] as f64;
                row += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sq_sum[(y + 1) * stride + x + 1] = sq_sum[y * stride + x + 1] + row_sq;
            }
        }

        let mut integrals = Self {
            stride,
            sum,
            sq_sum,
            tilted: Vec::new(),
            tilted_pad: 0,
            tilted_stride: 0,
        };
        if with_tilted {
            integrals.build_tilted(image);
        }
        integrals
    }

    /// T(X, Y) sums the pixels of the upward cone with apex (X-1, Y-1):
    /// rows `y < Y` with `|x - (X-1)| <= Y-1-y`.
    fn build_tilted(&mut self, image: &GrayImage) {
        let (w, h) = (image.width() as i64, image.height() as i64);
        let pad = h + 2;
        let cols = (w + 2 * pad + 1) as usize;
        let rows = (h + 1) as usize;
        let mut t = vec![0.0; cols * rows];

        let pixel = |x: i64, y: i64| -> f64 {
            if x < 0 || y < 0 || x >= w || y >= h {
                0.0
            } else {
                image.get_pixel(x as u32, y as u32).0[0] as f64
            }
        };

        for yy in 1..rows {
            let big_y = yy as i64;
            for c in 0..cols {
                let big_x = c as i64 - pad;
                let left = if c >= 1 { t[(yy - 1) * cols + c - 1] } else { 0.0 };
                let right = if c + 1 < cols { t[(yy - 1) * cols + c + 1] } else { 0.0 };
                let above = if yy >= 2 { t[(yy - 2) * cols + c] } else { 0.0 };
                t[yy * cols + c] = left + right - above
                    + pixel(big_x - 1, big_y - 1)
                    + pixel(big_x - 1, big_y - 2);
            }
        }

        self.tilted = t;
        self.tilted_pad = pad;
        self.tilted_stride = cols;
    }

    #[inline]
    fn at(table: &[f64], stride: usize, x: i64, y: i64) -> f64 {
        table[y as usize * stride + x as usize]
    }

    fn rect_sum(&self, x: i64, y: i64, w: i64, h: i64) -> f64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn rect_sq_sum(&self, x: i64, y: i64, w: i64, h: i64) -> f64 {
        Self::rect(&self.sq_sum, self.stride, x, y, w, h)
    }

    fn rect(table: &[f64], stride: usize, x: i64, y: i64, w: i64, h: i64) -> f64 {
        Self::at(table, stride, x + w, y + h) - Self::at(table, stride, x, y + h)
            - Self::at(table, stride, x + w, y)
            + Self::at(table, stride, x, y)
    }

    fn tilted_at(&self, x: i64, y: i64) -> f64 {
        self.tilted[y as usize * self.tilted_stride + (x + self.tilted_pad) as usize]
    }

    /// Sum of a 45° rectangle whose top corner is (x, y)
    fn tilted_sum(&self, x: i64, y: i64, w: i64, h: i64) -> f64 {
        self.tilted_at(x, y) - self.tilted_at(x - h, y + h) - self.tilted_at(x + w, y + w)
            + self.tilted_at(x + w - h, y + w + h)
    }
}

fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64) * 0.5;
    let (ax, ay, bx, by) = (a.x as f64, a.y as f64, b.x as f64, b.y as f64);
    (ax - bx).abs() <= delta
        && (ay - by).abs() <= delta
        && (ax + a.width as f64 - bx - b.width as f64).abs() <= delta
        && (ay + a.height as f64 - by - b.height as f64).abs() <= delta
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster similar rectangles and keep clusters with more than
/// `min_neighbors` members, averaged. Small clusters nested inside a
/// stronger one are dropped. With `min_neighbors == 0` the input is
/// returned untouched.
pub fn group_rectangles(rects: Vec<Rect>, min_neighbors: u32, eps: f64) -> Vec<Rect> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find_root(&mut parent, i), find_root(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // cluster label in first-seen order
    let mut labels = vec![usize::MAX; n];
    let mut totals: Vec<([f64; 4], u32)> = Vec::new();
    for i in 0..n {
        let root = find_root(&mut parent, i);
        if labels[root] == usize::MAX {
            labels[root] = totals.len();
            totals.push(([0.0; 4], 0));
        }
        let entry = &mut totals[labels[root]];
        let r = &rects[i];
        entry.0[0] += r.x as f64;
        entry.0[1] += r.y as f64;
        entry.0[2] += r.width as f64;
        entry.0[3] += r.height as f64;
        entry.1 += 1;
    }

    let clusters: Vec<(Rect, u32)> = totals
        .iter()
        .map(|(acc, count)| {
            let s = 1.0 / *count as f64;
            (
                Rect::new(
                    (acc[0] * s).round() as u32,
                    (acc[1] * s).round() as u32,
                    (acc[2] * s).round() as u32,
                    (acc[3] * s).round() as u32,
                ),
                *count,
            )
        })
        .collect();

    let mut grouped = Vec::new();
    for (i, &(r1, n1)) in clusters.iter().enumerate() {
        if n1 <= min_neighbors {
            continue;
        }

        let nested = clusters.iter().enumerate().any(|(j, &(r2, n2))| {
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let (x1, y1, w1, h1) = (r1.x as i64, r1.y as i64, r1.width as i64, r1.height as i64);
            let (x2, y2, w2, h2) = (r2.x as i64, r2.y as i64, r2.width as i64, r2.height as i64);
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + w1 <= x2 + w2 + dx
                && y1 + h1 <= y2 + h2 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            grouped.push(r1);
        }
    }

    grouped
}

fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

/// `<_>` list entries of a sequence node
fn items<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name).and_then(|n| n.text()).map(str::trim)
}

fn numbers(text: &str) -> Result<Vec<f64>, String> {
    text.split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|e| format!("invalid number '{}': {}", t, e))
        })
        .collect()
}

fn child_numbers(node: roxmltree::Node<'_, '_>, name: &str) -> Result<Vec<f64>, String> {
    let text = child_text(node, name).ok_or_else(|| format!("missing <{}>", name))?;
    numbers(text)
}

fn child_number(node: roxmltree::Node<'_, '_>, name: &str) -> Result<f64, String> {
    child_numbers(node, name)?
        .first()
        .copied()
        .ok_or_else(|| format!("empty <{}>", name))
}

/// One stump: bright lower half versus dark upper half of a 6x6 window
#[cfg(test)]
pub(crate) const EDGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>6</height>
  <width>6</width>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 0.</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 6 3 -1.</_>
        <_>
          0 3 6 3 1.</_></rects></_></features></cascade>
</opencv_storage>
"#;
