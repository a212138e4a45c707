//! Export pipeline integration tests.
//!
//! These run against in-memory containers and a recording codec, so they
//! need neither DICOM fixtures nor FFmpeg.

mod common;

use std::{fs, io::ErrorKind, path::Path};

use czm_export::{
    CzmError, ErrorPolicy, ExportOptions, Exporter, FrameCountField, MemoryContainer,
    OutputFormat, OwnedPixelData, SourceProfile, StudyIdentifiers,
};

use common::{RecordingCodec, ZEISS, codestream, multi_frame_container, scramble, unmarked_frame};

const FRAME_LENGTH: usize = 2000;
const FRAME_OFFSET: usize = 1200;

fn study_directory(root: &Path) -> std::path::PathBuf {
    root.join("P000001").join("20240131").join("OD").join("study_1")
}

fn scrambled_frames(count: usize) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let originals: Vec<Vec<u8>> = (0..count)
        .map(|seed| codestream(FRAME_LENGTH, seed))
        .collect();
    let scrambled = originals
        .iter()
        .map(|original| scramble(original, FRAME_OFFSET))
        .collect();
    (originals, scrambled)
}

fn jp2_files(directory: &Path) -> usize {
    fs::read_dir(directory)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "jp2"))
                .count()
        })
        .unwrap_or(0)
}

// ── Multi-frame path ───────────────────────────────────────────────

#[test]
fn multi_frame_export_writes_indexed_images() {
    let output = tempfile::tempdir().unwrap();
    let (originals, scrambled) = scrambled_frames(3);
    let container = multi_frame_container(scrambled, FrameCountField::Text("3\09".to_string()));

    let exporter = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Abort));
    let report = exporter.export(&container, output.path()).unwrap();

    let directory = study_directory(output.path());
    assert_eq!(report.frame_count, Some(3));
    assert!(report.is_complete());
    assert_eq!(
        report.written,
        vec![
            directory.join("000.png"),
            directory.join("001.png"),
            directory.join("002.png"),
        ]
    );
    for path in &report.written {
        assert!(path.exists(), "{} missing", path.display());
    }
    assert_eq!(jp2_files(&directory), 0, "temporary codestreams left behind");

    let decoded = exporter.codec().decoded();
    assert_eq!(decoded.len(), 3);
    for (index, (path, bytes)) in decoded.iter().enumerate() {
        assert_eq!(path, &directory.join(format!("{index:03}.jp2")));
        assert_eq!(bytes, &originals[index]);
    }
    assert_eq!(exporter.codec().transposed(), 3);
}

#[test]
fn multi_frame_images_are_transposed() {
    let output = tempfile::tempdir().unwrap();
    let (_, scrambled) = scrambled_frames(1);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(1));

    let exporter = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Abort));
    let report = exporter.export(&container, output.path()).unwrap();

    assert_eq!(report.written, vec![study_directory(output.path()).join("000.png")]);
    let image = image::open(&report.written[0]).unwrap();
    assert_eq!((image.width(), image.height()), (2, 3));
    assert_eq!(exporter.codec().transposed(), 1);
}

#[test]
fn output_format_sets_extension() {
    let output = tempfile::tempdir().unwrap();
    let (_, scrambled) = scrambled_frames(2);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(2));

    let options = ExportOptions::new(ErrorPolicy::Abort).with_output_format(OutputFormat::Tiff);
    let report = Exporter::new(RecordingCodec::default(), options)
        .export(&container, output.path())
        .unwrap();
    assert!(report.written.iter().all(|path| path.extension().unwrap() == "tiff"));
}

// ── Single-frame path ──────────────────────────────────────────────

#[test]
fn absent_frame_count_writes_one_untransposed_image() {
    let output = tempfile::tempdir().unwrap();
    let original = codestream(FRAME_LENGTH, 9);
    let container = MemoryContainer::new("study.1")
        .with_manufacturer(ZEISS)
        .with_pixel_data(OwnedPixelData::Native(scramble(&original, FRAME_OFFSET)))
        .with_identifiers(StudyIdentifiers::from_raw(
            Some("P000001"),
            Some("20240131"),
            Some("OD"),
        ));

    let exporter = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Abort));
    let report = exporter.export(&container, output.path()).unwrap();

    let parent = output.path().join("P000001").join("20240131").join("OD");
    assert_eq!(report.frame_count, None);
    assert_eq!(report.written, vec![parent.join("study_1.png")]);
    assert!(!parent.join("study_1").exists());
    assert!(!parent.join("study_1.jp2").exists());

    let image = image::open(parent.join("study_1.png")).unwrap();
    assert_eq!((image.width(), image.height()), (3, 2));
    assert_eq!(exporter.codec().transposed(), 0);
    assert_eq!(exporter.codec().decoded()[0].1, original);
}

#[test]
fn single_frame_concatenates_fragments() {
    let output = tempfile::tempdir().unwrap();
    let original = codestream(FRAME_LENGTH, 4);
    let scrambled = scramble(&original, FRAME_OFFSET);
    let container = MemoryContainer::new("scan")
        .with_manufacturer(ZEISS)
        .with_pixel_data(OwnedPixelData::Encapsulated {
            offset_table: Vec::new(),
            fragments: vec![scrambled[..700].to_vec(), scrambled[700..].to_vec()],
        });

    let exporter = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Abort));
    exporter.export(&container, output.path()).unwrap();
    assert_eq!(exporter.codec().decoded()[0].1, original);
}

// ── Layout ─────────────────────────────────────────────────────────

#[test]
fn missing_identifiers_use_fallbacks_then_unknown() {
    let output = tempfile::tempdir().unwrap();
    let (_, scrambled) = scrambled_frames(1);
    let container = MemoryContainer::new("scan")
        .with_manufacturer(ZEISS)
        .with_pixel_data(OwnedPixelData::Encapsulated {
            offset_table: Vec::new(),
            fragments: scrambled,
        })
        .with_frame_count(FrameCountField::Integer(1));

    let options = ExportOptions::new(ErrorPolicy::Abort)
        .with_fallbacks(StudyIdentifiers::from_raw(Some("FALLBACK1"), None, None));
    let report = Exporter::new(RecordingCodec::default(), options)
        .export(&container, output.path())
        .unwrap();

    assert_eq!(
        report.written,
        vec![
            output
                .path()
                .join("FALLBAC")
                .join("UNKNOWN")
                .join("UNKNOWN")
                .join("scan")
                .join("000.png")
        ]
    );
}

#[test]
fn hostile_identifiers_stay_under_output_root() {
    let output = tempfile::tempdir().unwrap();
    let (_, scrambled) = scrambled_frames(2);
    let container = MemoryContainer::new("scan")
        .with_manufacturer(ZEISS)
        .with_pixel_data(OwnedPixelData::Encapsulated {
            offset_table: Vec::new(),
            fragments: scrambled,
        })
        .with_frame_count(FrameCountField::Integer(2))
        .with_identifiers(StudyIdentifiers::from_raw(
            Some("/tmp/zz"),
            Some("../.."),
            Some(".."),
        ));

    let report = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Abort))
        .export(&container, output.path())
        .unwrap();

    assert_eq!(report.written.len(), 2);
    let directory = output
        .path()
        .join("_tmp_zz")
        .join(".._..")
        .join("UNKNOWN")
        .join("scan");
    for path in &report.written {
        assert!(path.starts_with(output.path()), "{} escaped the root", path.display());
        assert_eq!(path.parent(), Some(directory.as_path()));
    }
}

// ── Error policy ───────────────────────────────────────────────────

#[test]
fn continue_policy_skips_failing_frame() {
    let output = tempfile::tempdir().unwrap();
    let (_, mut scrambled) = scrambled_frames(3);
    scrambled[1] = unmarked_frame(FRAME_LENGTH);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(3));

    let exporter = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Continue));
    let report = exporter.export(&container, output.path()).unwrap();

    let directory = study_directory(output.path());
    assert!(!report.is_complete());
    assert_eq!(report.written, vec![directory.join("000.png"), directory.join("002.png")]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, Some(1));
    assert!(matches!(
        report.failures[0].error,
        CzmError::NoHeaderMarker { length: FRAME_LENGTH }
    ));
    assert!(report.failures[0].to_string().starts_with("frame 001"));
}

#[test]
fn abort_policy_stops_at_failing_frame() {
    let output = tempfile::tempdir().unwrap();
    let (_, mut scrambled) = scrambled_frames(3);
    scrambled[1] = unmarked_frame(FRAME_LENGTH);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(3));

    let exporter = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Abort));
    let error = exporter.export(&container, output.path()).unwrap_err();

    match &error {
        CzmError::Frame { index, source } => {
            assert_eq!(*index, Some(1));
            assert!(matches!(**source, CzmError::NoHeaderMarker { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(error.to_string().starts_with("Frame 001 failed"), "{error}");

    let directory = study_directory(output.path());
    assert!(directory.join("000.png").exists());
    assert!(!directory.join("002.png").exists());
}

#[test]
fn codestream_is_removed_when_decoding_fails() {
    let output = tempfile::tempdir().unwrap();
    let (_, scrambled) = scrambled_frames(2);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(2));

    let exporter = Exporter::new(RecordingCodec::failing(), ExportOptions::new(ErrorPolicy::Continue));
    let report = exporter.export(&container, output.path()).unwrap();

    assert!(report.written.is_empty());
    assert_eq!(report.failures.len(), 2);
    assert!(matches!(report.failures[0].error, CzmError::Codec(_)));
    assert_eq!(jp2_files(&study_directory(output.path())), 0);
    assert!(exporter.codec().encoded().is_empty());
}

#[test]
fn offset_disagreements_are_counted_not_failed() {
    let output = tempfile::tempdir().unwrap();
    let originals = [codestream(FRAME_LENGTH, 0), codestream(FRAME_LENGTH, 1)];
    let scrambled = vec![
        scramble(&originals[0], FRAME_OFFSET),
        scramble(&originals[1], 1100),
    ];
    let container = multi_frame_container(scrambled, FrameCountField::Integer(2));

    let exporter = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Abort));
    let report = exporter.export(&container, output.path()).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.offset_disagreements, 1);
    assert_eq!(exporter.codec().decoded()[1].1, originals[1]);
}

#[test]
fn existing_image_is_kept_without_overwrite() {
    let output = tempfile::tempdir().unwrap();
    let directory = study_directory(output.path());
    fs::create_dir_all(&directory).unwrap();
    fs::write(directory.join("000.png"), b"keep me").unwrap();

    let (_, scrambled) = scrambled_frames(1);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(1));
    let options = ExportOptions::new(ErrorPolicy::Continue).with_overwrite(false);
    let report = Exporter::new(RecordingCodec::default(), options)
        .export(&container, output.path())
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        &report.failures[0].error,
        CzmError::IoError(error) if error.kind() == ErrorKind::AlreadyExists
    ));
    assert_eq!(fs::read(directory.join("000.png")).unwrap(), b"keep me");
}

// ── Whole-file preconditions ───────────────────────────────────────

fn assert_nothing_written(root: &Path) {
    assert_eq!(fs::read_dir(root).unwrap().count(), 0, "output root not empty");
}

#[test]
fn wrong_manufacturer_is_rejected() {
    let output = tempfile::tempdir().unwrap();
    let (_, scrambled) = scrambled_frames(1);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(1))
        .with_manufacturer("Heidelberg Engineering");

    let exporter = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Continue));
    let error = exporter.export(&container, output.path()).unwrap_err();
    assert!(matches!(error, CzmError::UnsupportedManufacturer { .. }));
    assert!(error.is_precondition());
    assert_nothing_written(output.path());
    assert!(exporter.codec().decoded().is_empty());
}

#[test]
fn wrong_transfer_syntax_is_rejected() {
    let output = tempfile::tempdir().unwrap();
    let (_, scrambled) = scrambled_frames(1);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(1))
        .with_transfer_syntax("1.2.840.10008.1.2.1");

    let error = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Continue))
        .export(&container, output.path())
        .unwrap_err();
    assert!(matches!(error, CzmError::UnsupportedTransferSyntax { .. }));
    assert_nothing_written(output.path());
}

#[test]
fn custom_profile_accepts_other_vendor() {
    let output = tempfile::tempdir().unwrap();
    let (_, scrambled) = scrambled_frames(1);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(1))
        .with_manufacturer("Acme Optics");

    let profile = SourceProfile {
        manufacturer_prefix: "Acme".to_string(),
        ..SourceProfile::default()
    };
    let options = ExportOptions::new(ErrorPolicy::Abort).with_profile(profile);
    let report = Exporter::new(RecordingCodec::default(), options)
        .export(&container, output.path())
        .unwrap();
    assert_eq!(report.written.len(), 1);
}

#[test]
fn missing_pixel_data_is_rejected() {
    let output = tempfile::tempdir().unwrap();
    let container = MemoryContainer::new("scan").with_manufacturer(ZEISS);

    let error = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Continue))
        .export(&container, output.path())
        .unwrap_err();
    assert!(matches!(error, CzmError::MissingPixelData));
    assert_nothing_written(output.path());
}

#[test]
fn zero_frame_count_is_rejected() {
    let output = tempfile::tempdir().unwrap();
    let (_, scrambled) = scrambled_frames(1);
    let container = multi_frame_container(scrambled, FrameCountField::Text("0".to_string()));

    let error = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Continue))
        .export(&container, output.path())
        .unwrap_err();
    assert!(matches!(error, CzmError::InvalidFrameCount(_)));
    assert_nothing_written(output.path());
}

#[test]
fn unsplittable_pixel_data_is_rejected() {
    let output = tempfile::tempdir().unwrap();
    let (_, scrambled) = scrambled_frames(2);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(5));

    let error = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Continue))
        .export(&container, output.path())
        .unwrap_err();
    assert!(matches!(error, CzmError::FrameSplit(_)));
    assert_nothing_written(output.path());
}

// ── Codestream export ──────────────────────────────────────────────

#[test]
fn codestream_export_keeps_jp2_files_without_decoding() {
    let output = tempfile::tempdir().unwrap();
    let (originals, scrambled) = scrambled_frames(2);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(2));

    let exporter = Exporter::new(RecordingCodec::default(), ExportOptions::new(ErrorPolicy::Abort));
    let report = exporter.export_codestreams(&container, output.path()).unwrap();

    let directory = study_directory(output.path());
    assert_eq!(report.written, vec![directory.join("000.jp2"), directory.join("001.jp2")]);
    assert_eq!(fs::read(directory.join("001.jp2")).unwrap(), originals[1]);
    assert!(exporter.codec().decoded().is_empty());
}

// ── Parallel ───────────────────────────────────────────────────────

#[cfg(feature = "rayon")]
#[test]
fn parallel_export_matches_sequential_order() {
    let output = tempfile::tempdir().unwrap();
    let (_, mut scrambled) = scrambled_frames(8);
    scrambled[5] = unmarked_frame(FRAME_LENGTH);
    let container = multi_frame_container(scrambled, FrameCountField::Integer(8));

    let options = ExportOptions::new(ErrorPolicy::Continue).with_parallel(true);
    let report = Exporter::new(RecordingCodec::default(), options)
        .export(&container, output.path())
        .unwrap();

    let directory = study_directory(output.path());
    let expected: Vec<_> = [0, 1, 2, 3, 4, 6, 7]
        .iter()
        .map(|index| directory.join(format!("{index:03}.png")))
        .collect();
    assert_eq!(report.written, expected);
    assert_eq!(report.failures[0].index, Some(5));
    assert_eq!(jp2_files(&directory), 0);
}
