//! Turns a box stream back into video: annotated copies, per-track thumbnails
//! and per-track focused crops.
//!
//! Every operation walks the source once, pairing decoded frame `i` with entry
//! `i` of the box stream, and fails with an alignment error when the two
//! disagree on frame rate or length.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use opencv::{
    core::{self, Mat, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AlignmentError, Error, Result};
use crate::frame::{BoxStream, FrameBoxes, TrackId};
use crate::geometry::{self, Rect};
use crate::video::{FrameSink, FrameSource};

const FPS_TOLERANCE: f64 = 1e-3;

/// Per-track visualization settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PlayerParams {
    pub label: Option<String>,
    pub draw: bool,
}

impl Default for PlayerParams {
    fn default() -> Self {
        Self {
            label: None,
            draw: true,
        }
    }
}

impl PlayerParams {
    pub fn labeled<S: Into<String>>(label: S) -> Self {
        Self {
            label: Some(label.into()),
            draw: true,
        }
    }

    pub fn hidden() -> Self {
        Self {
            label: None,
            draw: false,
        }
    }

    /// The configured label, or `id{N}` when it is missing or empty.
    pub fn label_for(&self, id: TrackId) -> String {
        match self.label.as_deref() {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => format!("id{}", id),
        }
    }
}

pub type ParamsById = BTreeMap<TrackId, PlayerParams>;

pub fn default_params(ids: &BTreeSet<TrackId>) -> ParamsById {
    ids.iter().map(|&id| (id, PlayerParams::default())).collect()
}

/// `params` must hold exactly one entry per known track id.
pub fn validate_params(params: &ParamsById, known: &BTreeSet<TrackId>) -> Result<()> {
    let missing: Vec<TrackId> = known.iter().filter(|id| !params.contains_key(id)).copied().collect();
    let unexpected: Vec<TrackId> = params.keys().filter(|id| !known.contains(id)).copied().collect();

    if missing.is_empty() && unexpected.is_empty() {
        return Ok(());
    }

    warn!(?missing, ?unexpected, "Player params do not cover the known track ids");

    Err(Error::ParameterCoverage {
        missing,
        unexpected,
    })
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RenderStyle {
    /// Box and label tab colour, BGR
    pub color: [f64; 3],
    /// Label text colour, BGR
    pub text_color: [f64; 3],
    pub thickness: i32,
    pub font_scale: f64,
    pub text_thickness: i32,
    /// Space between the label text and its tab border
    pub padding: i32,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            color: [255.0, 255.0, 255.0],
            text_color: [0.0, 0.0, 0.0],
            thickness: 3,
            font_scale: 0.7,
            text_thickness: 2,
            padding: 4,
        }
    }
}

#[inline]
fn scalar(c: [f64; 3]) -> core::Scalar {
    core::Scalar::new(c[0], c[1], c[2], 0.0)
}

fn draw_track(frame: &mut Mat, rect: Rect, label: &str, style: &RenderStyle) -> Result<()> {
    let color = scalar(style.color);

    imgproc::rectangle(
        frame,
        rect.as_cv(),
        color,
        style.thickness,
        imgproc::LINE_8,
        0,
    )?;

    let mut base_line = 0;
    let text = imgproc::get_text_size(
        label,
        imgproc::FONT_HERSHEY_SIMPLEX,
        style.font_scale,
        style.text_thickness,
        &mut base_line,
    )?;

    let tab_w = text.width + 2 * style.padding;
    let tab_h = text.height + base_line + 2 * style.padding;

    // above the box, or inside it when that would leave the frame
    let tab_top = if rect.y1 - tab_h >= 0 {
        rect.y1 - tab_h
    } else {
        rect.y1
    };
    let tab = core::Rect::new(rect.x1, tab_top, tab_w, tab_h);

    imgproc::rectangle(frame, tab, color, imgproc::FILLED, imgproc::LINE_8, 0)?;
    imgproc::put_text(
        frame,
        label,
        core::Point::new(rect.x1 + style.padding, tab_top + style.padding + text.height),
        imgproc::FONT_HERSHEY_SIMPLEX,
        style.font_scale,
        scalar(style.text_color),
        style.text_thickness,
        imgproc::LINE_AA,
        false,
    )?;

    Ok(())
}

/// Feeds `(index, frame, boxes)` for every decoded frame to `f`, enforcing
/// frame rate and frame count alignment with `stream`.
fn for_each_aligned<S, F>(source: &mut S, stream: &BoxStream, mut f: F) -> Result<()>
where
    S: FrameSource + ?Sized,
    F: FnMut(usize, Mat, &FrameBoxes) -> Result<()>,
{
    if (source.fps() - stream.fps).abs() > FPS_TOLERANCE {
        return Err(AlignmentError::FrameRate {
            video: source.fps(),
            boxes: stream.fps,
        }
        .into());
    }

    let mut idx = 0;
    while let Some(frame) = source.read()? {
        let Some(boxes) = stream.frames.get(idx) else {
            let mut video = idx + 1;
            while source.read()?.is_some() {
                video += 1;
            }

            return Err(AlignmentError::FrameCount {
                video,
                boxes: stream.len(),
            }
            .into());
        };

        f(idx, frame, boxes)?;
        idx += 1;
    }

    if idx != stream.len() {
        return Err(AlignmentError::FrameCount {
            video: idx,
            boxes: stream.len(),
        }
        .into());
    }

    Ok(())
}

/// Draws every drawable track's box and label. Returns the number of frames written.
pub fn annotate<S, W>(
    source: &mut S,
    sink: &mut W,
    stream: &BoxStream,
    params: &ParamsById,
    style: &RenderStyle,
) -> Result<usize>
where
    S: FrameSource + ?Sized,
    W: FrameSink + ?Sized,
{
    validate_params(params, &stream.track_ids())?;

    let mut written = 0;
    for_each_aligned(source, stream, |_, mut frame, boxes| {
        for (id, rect) in boxes.tracked() {
            match params.get(&id) {
                Some(p) if p.draw => draw_track(&mut frame, rect, &p.label_for(id), style)?,
                _ => {}
            }
        }

        sink.write(&frame)?;
        written += 1;

        Ok(())
    })?;

    info!(frames = written, tracks = params.len(), "Annotated video rendered");

    Ok(written)
}

fn crop(frame: &Mat, rect: Rect) -> Result<Mat> {
    let roi = Mat::roi(frame, rect.as_cv())?;
    let mut out = Mat::default();
    roi.copy_to(&mut out)?;

    Ok(out)
}

/// One image per track id, cut from the frame where the id is first seen.
/// A box lying wholly outside that frame yields the 1x1 crop of its nearest
/// frame pixel.
pub fn thumbnails<S>(source: &mut S, stream: &BoxStream) -> Result<BTreeMap<TrackId, Mat>>
where
    S: FrameSource + ?Sized,
{
    let mut out = BTreeMap::new();

    for_each_aligned(source, stream, |idx, frame, boxes| {
        for (id, rect) in boxes.tracked() {
            if out.contains_key(&id) {
                continue;
            }

            let (w, h) = (frame.cols(), frame.rows());
            let mut clamped = rect.clamp_to(w, h);
            if clamped.is_empty() {
                debug!(id, frame = idx, "Track box outside the frame, using nearest pixel");
                let x = rect.x1.clamp(0, w - 1);
                let y = rect.y1.clamp(0, h - 1);
                clamped = Rect::new(x, y, x + 1, y + 1);
            }

            out.insert(id, crop(&frame, clamped)?);
        }

        Ok(())
    })?;

    Ok(out)
}

/// Thumbnail of a single known track.
pub fn thumbnail<S>(source: &mut S, stream: &BoxStream, id: TrackId) -> Result<Mat>
where
    S: FrameSource + ?Sized,
{
    if !stream.track_ids().contains(&id) {
        return Err(Error::UnknownTrack(id));
    }

    thumbnails(source, stream)?
        .remove(&id)
        .ok_or(Error::UnknownTrack(id))
}

/// Writes `{id}.jpg` for every thumbnail into `dir`.
pub fn save_thumbnails(thumbs: &BTreeMap<TrackId, Mat>, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let mut paths = Vec::with_capacity(thumbs.len());
    for (id, image) in thumbs {
        let path = dir.join(format!("{}.jpg", id));
        if !imgcodecs::imwrite(&path.to_string_lossy(), image, &Vector::new())? {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("unable to encode {}", path.display()),
            )
            .into());
        }
        paths.push(path);
    }

    Ok(paths)
}

/// Crop rectangle for every frame containing `id`: all share the largest size the
/// track's box ever takes, centred on that frame's box and fitted into the frame.
pub fn crop_plan(stream: &BoxStream, id: TrackId, frame_w: i32, frame_h: i32) -> Result<Vec<(usize, Rect)>> {
    let appearances: Vec<(usize, Rect)> = stream
        .appearances(id)
        .into_iter()
        .map(|(idx, r)| (idx, r.clamp_to(frame_w, frame_h)))
        .collect();

    let max_w = appearances.iter().map(|(_, r)| r.width()).max();
    let max_h = appearances.iter().map(|(_, r)| r.height()).max();

    let (Some(max_w), Some(max_h)) = (max_w, max_h) else {
        return Err(Error::UnknownTrack(id));
    };
    let (max_w, max_h) = (max_w.max(1), max_h.max(1));

    Ok(appearances
        .into_iter()
        .map(|(idx, r)| (idx, geometry::pad_to_size(&r, max_w, max_h, frame_w, frame_h)))
        .collect())
}

/// Video of only the frames containing `id`, each cropped around its box.
/// Gaps in the track become jump cuts. Returns the number of frames written.
pub fn crop_to_track<S, W>(source: &mut S, sink: &mut W, stream: &BoxStream, id: TrackId) -> Result<usize>
where
    S: FrameSource + ?Sized,
    W: FrameSink + ?Sized,
{
    if stream.appearances(id).is_empty() {
        return Err(Error::UnknownTrack(id));
    }

    let mut plan: Option<BTreeMap<usize, Rect>> = None;
    let mut written = 0;

    for_each_aligned(source, stream, |idx, frame, _| {
        let (fw, fh) = (frame.cols(), frame.rows());
        if plan.is_none() {
            plan = Some(crop_plan(stream, id, fw, fh)?.into_iter().collect());
        }

        if let Some(rect) = plan.as_ref().and_then(|p| p.get(&idx)) {
            sink.write(&crop(&frame, rect.clamp_to(fw, fh))?)?;
            written += 1;
        }

        Ok(())
    })?;

    info!(id, frames = written, "Focused video rendered");

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TrackedBox;
    use crate::video::MemorySource;

    const W: i32 = 80;
    const H: i32 = 64;

    /// Frame `i` is filled with grey level `i * 10`.
    fn frames(n: usize) -> Vec<Mat> {
        (0..n)
            .map(|i| {
                Mat::new_rows_cols_with_default(H, W, core::CV_8UC3, core::Scalar::all(i as f64 * 10.0))
                    .unwrap()
            })
            .collect()
    }

    fn source(n: usize) -> MemorySource {
        MemorySource::new(25.0, frames(n))
    }

    fn stream(frames: Vec<FrameBoxes>) -> BoxStream {
        BoxStream::new(25.0, frames)
    }

    fn boxes(items: &[(TrackId, Rect)]) -> FrameBoxes {
        items.iter().map(|&(id, r)| TrackedBox::tracked(r, id)).collect()
    }

    fn pixel(m: &Mat, x: i32, y: i32) -> u8 {
        m.at_2d::<core::Vec3b>(y, x).unwrap()[0]
    }

    fn two_track_stream() -> BoxStream {
        stream(vec![
            boxes(&[(1, Rect::new(10, 20, 30, 40))]),
            boxes(&[(1, Rect::new(12, 20, 32, 40)), (2, Rect::new(50, 30, 70, 60))]),
            FrameBoxes::new(vec![TrackedBox::new(Rect::new(0, 0, 5, 5), None)]),
        ])
    }

    #[test]
    fn test_label_defaults() {
        assert_eq!(PlayerParams::default().label_for(7), "id7");
        assert_eq!(PlayerParams::labeled("").label_for(7), "id7");
        assert_eq!(PlayerParams::labeled("keeper").label_for(7), "keeper");

        let p: PlayerParams = serde_json::from_str(r#"{"label": "striker"}"#).unwrap();
        assert!(p.draw);
    }

    #[test]
    fn test_validate_params_reports_both_sides() {
        let known = BTreeSet::from([1, 2, 3]);
        let params: ParamsById = [(1, PlayerParams::default()), (4, PlayerParams::default())]
            .into_iter()
            .collect();

        match validate_params(&params, &known) {
            Err(Error::ParameterCoverage {
                missing,
                unexpected,
            }) => {
                assert_eq!(missing, vec![2, 3]);
                assert_eq!(unexpected, vec![4]);
            }
            other => panic!("unexpected result {:?}", other),
        }

        assert!(validate_params(&default_params(&known), &known).is_ok());
    }

    #[test]
    fn test_annotate_hidden_tracks_leave_frames_untouched() {
        let stream = two_track_stream();
        let params: ParamsById = [(1, PlayerParams::hidden()), (2, PlayerParams::hidden())]
            .into_iter()
            .collect();

        let mut out: Vec<Mat> = Vec::new();
        let n = annotate(&mut source(3), &mut out, &stream, &params, &RenderStyle::default()).unwrap();

        assert_eq!(n, 3);
        for (a, b) in out.iter().zip(frames(3).iter()) {
            assert_eq!(a.size().unwrap(), b.size().unwrap());
            assert_eq!(a.data_bytes().unwrap(), b.data_bytes().unwrap());
        }
    }

    #[test]
    fn test_annotate_draws_only_drawable_tracks() {
        let stream = two_track_stream();
        let params: ParamsById = [(1, PlayerParams::labeled("a")), (2, PlayerParams::hidden())]
            .into_iter()
            .collect();

        let mut out: Vec<Mat> = Vec::new();
        annotate(&mut source(3), &mut out, &stream, &params, &RenderStyle::default()).unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[1].size().unwrap(), core::Size::new(W, H));
        // track 1 box border is white, track 2 area stays at frame 1's grey
        assert_eq!(pixel(&out[1], 12, 30), 255);
        assert_eq!(pixel(&out[1], 50, 45), 10);
        // id-less box in frame 2 is not drawn
        assert_eq!(out[2].data_bytes().unwrap(), frames(3)[2].data_bytes().unwrap());
    }

    #[test]
    fn test_annotate_requires_full_param_coverage() {
        let stream = two_track_stream();
        let params: ParamsById = [(1, PlayerParams::default())].into_iter().collect();

        let mut out: Vec<Mat> = Vec::new();
        let err = annotate(&mut source(3), &mut out, &stream, &params, &RenderStyle::default()).unwrap_err();

        assert!(matches!(err, Error::ParameterCoverage { ref missing, .. } if missing == &vec![2]));
        assert!(out.is_empty());
    }

    #[test]
    fn test_alignment_errors() {
        let stream = two_track_stream();
        let params = default_params(&stream.track_ids());
        let mut out: Vec<Mat> = Vec::new();

        let err = annotate(&mut source(5), &mut out, &stream, &params, &RenderStyle::default()).unwrap_err();
        assert!(matches!(err, Error::Alignment(AlignmentError::FrameCount { video: 5, boxes: 3 })));

        let err = thumbnails(&mut source(2), &stream).unwrap_err();
        assert!(matches!(err, Error::Alignment(AlignmentError::FrameCount { video: 2, boxes: 3 })));

        let mut slow = MemorySource::new(12.5, frames(3));
        let err = thumbnails(&mut slow, &stream).unwrap_err();
        assert!(matches!(err, Error::Alignment(AlignmentError::FrameRate { .. })));
    }

    #[test]
    fn test_thumbnail_from_first_appearance() {
        let mut items = vec![FrameBoxes::default(); 8];
        items[5] = boxes(&[(3, Rect::new(10, 10, 50, 60))]);
        items[6] = boxes(&[(3, Rect::new(0, 0, 20, 20)), (4, Rect::new(70, 50, 90, 70))]);
        let stream = stream(items);

        let thumbs = thumbnails(&mut source(8), &stream).unwrap();
        assert_eq!(thumbs.keys().copied().collect::<Vec<_>>(), vec![3, 4]);

        let t3 = &thumbs[&3];
        assert_eq!((t3.cols(), t3.rows()), (40, 50));
        assert_eq!(pixel(t3, 0, 0), 50);

        // clamped to the frame
        let t4 = &thumbs[&4];
        assert_eq!((t4.cols(), t4.rows()), (10, 14));
        assert_eq!(pixel(t4, 0, 0), 60);

        assert!(matches!(thumbnail(&mut source(8), &stream, 9), Err(Error::UnknownTrack(9))));
    }

    #[test]
    fn test_thumbnail_for_box_outside_frame() {
        let mut items = vec![FrameBoxes::default(); 4];
        items[1] = boxes(&[(5, Rect::new(W + 10, 20, W + 30, 40))]);
        items[2] = boxes(&[(5, Rect::new(10, 10, 30, 30))]);
        let stream = stream(items);

        let thumbs = thumbnails(&mut source(4), &stream).unwrap();
        let t5 = &thumbs[&5];
        assert_eq!((t5.cols(), t5.rows()), (1, 1));
        assert_eq!(pixel(t5, 0, 0), 10);

        assert_eq!(thumbnail(&mut source(4), &stream, 5).unwrap().cols(), 1);
    }

    #[test]
    fn test_save_thumbnails() {
        let dir = tempfile::tempdir().unwrap();
        let mut thumbs = BTreeMap::new();
        thumbs.insert(12, frames(1).remove(0));

        let paths = save_thumbnails(&thumbs, &dir.path().join("images")).unwrap();
        assert_eq!(paths, vec![dir.path().join("images").join("12.jpg")]);
        assert!(paths[0].exists());
    }

    #[test]
    fn test_crop_plan_keeps_max_size_in_bounds() {
        let s = stream(vec![
            boxes(&[(7, Rect::new(10, 10, 20, 30))]),
            boxes(&[(7, Rect::new(0, 0, 18, 14))]),
            boxes(&[(7, Rect::new(70, 50, 78, 60))]),
        ]);

        let plan = crop_plan(&s, 7, W, H).unwrap();
        assert_eq!(
            plan,
            vec![
                (0, Rect::new(6, 10, 24, 30)),
                (1, Rect::new(0, 0, 18, 20)),
                (2, Rect::new(62, 44, 80, 64)),
            ]
        );
        for (_, r) in &plan {
            assert_eq!((r.width(), r.height()), (18, 20));
            assert!(r.x1 >= 0 && r.y1 >= 0 && r.x2 <= W && r.y2 <= H);
        }

        assert!(matches!(crop_plan(&s, 8, W, H), Err(Error::UnknownTrack(8))));
    }

    #[test]
    fn test_crop_to_track_skips_gaps() {
        let mut items = vec![FrameBoxes::default(); 10];
        for idx in [2, 3, 4, 8, 9] {
            items[idx] = boxes(&[(7, Rect::new(10 + idx as i32, 10, 30 + idx as i32, 30))]);
        }
        items[5] = boxes(&[(1, Rect::new(0, 0, 10, 10))]);
        let stream = stream(items);

        let mut out: Vec<Mat> = Vec::new();
        let n = crop_to_track(&mut source(10), &mut out, &stream, 7).unwrap();

        assert_eq!(n, 5);
        assert_eq!(out.len(), 5);
        assert_eq!(
            out.iter().map(|m| pixel(m, 0, 0)).collect::<Vec<_>>(),
            vec![20, 30, 40, 80, 90]
        );
        assert!(out.iter().all(|m| (m.cols(), m.rows()) == (20, 20)));
    }

    #[test]
    fn test_crop_to_unknown_track() {
        let mut out: Vec<Mat> = Vec::new();
        let err = crop_to_track(&mut source(3), &mut out, &two_track_stream(), 5).unwrap_err();

        assert!(matches!(err, Error::UnknownTrack(5)));
    }
}
