mod common;

use common::write_image;
use occipital::{
    load_labeled_folders, load_tag_file, load_tag_file_with_root, train_test_split, LabeledImage, PipelineError,
};
use std::fs;

#[test]
fn test_labeled_folders_feed_a_pipeline() -> Result<(), PipelineError> {
    let root = tempfile::tempdir()?;
    for (folder, color) in [("cat", [220, 30, 30]), ("dog", [30, 30, 220])] {
        let dir = root.path().join(folder);
        fs::create_dir(&dir)?;
        for i in 0..3 {
            write_image(&dir, &format!("{}.png", i), color, 10);
        }
    }

    let records = load_labeled_folders(root.path())?;
    assert_eq!(records.len(), 6);
    assert_eq!(records[0].label, "cat");
    assert_eq!(records[5].label, "dog");

    let fitted = common::mean_color_pipeline()?.fit(&records)?;
    assert_eq!(occipital::evaluate(&fitted, &records)?.macro_accuracy, 1.0);
    Ok(())
}

#[test]
fn test_tag_file_resolves_relative_paths() -> Result<(), PipelineError> {
    let dir = tempfile::tempdir()?;
    write_image(dir.path(), "broccoli.png", [30, 200, 30], 6);
    write_image(dir.path(), "toaster.png", [200, 200, 200], 6);
    let tags = dir.path().join("tags.tsv");
    fs::write(&tags, "broccoli.png\tfood\n\ntoaster.png\tappliance\n")?;

    let records = load_tag_file(&tags)?;
    assert_eq!(
        records,
        vec![
            LabeledImage::new(dir.path().join("broccoli.png"), "food"),
            LabeledImage::new(dir.path().join("toaster.png"), "appliance"),
        ]
    );
    Ok(())
}

#[test]
fn test_tag_file_with_separate_image_root() -> Result<(), PipelineError> {
    let images = tempfile::tempdir()?;
    let meta = tempfile::tempdir()?;
    write_image(images.path(), "a.png", [10, 10, 10], 4);
    let tags = meta.path().join("tags.tsv");
    fs::write(&tags, "a.png\tdark\n")?;

    let records = load_tag_file_with_root(&tags, images.path())?;
    assert_eq!(records[0].path, images.path().join("a.png"));
    Ok(())
}

#[test]
fn test_malformed_tag_row_reports_line() -> Result<(), PipelineError> {
    let dir = tempfile::tempdir()?;
    write_image(dir.path(), "a.png", [10, 10, 10], 4);
    let tags = dir.path().join("tags.tsv");
    fs::write(&tags, "a.png\tdark\na.png\n")?;

    match load_tag_file(&tags) {
        Err(PipelineError::MalformedRecord { row, .. }) => assert_eq!(row, 2),
        Err(other) => panic!("expected MalformedRecord, got {:?}", other),
        Ok(_) => panic!("expected MalformedRecord"),
    }
    Ok(())
}

#[test]
fn test_tag_file_missing_image() -> Result<(), PipelineError> {
    let dir = tempfile::tempdir()?;
    let tags = dir.path().join("tags.tsv");
    fs::write(&tags, "ghost.png\tspooky\n")?;
    assert!(matches!(load_tag_file(&tags), Err(PipelineError::ImageRead { .. })));
    Ok(())
}

#[test]
fn test_seeded_split_is_reproducible_and_stratified() -> Result<(), PipelineError> {
    let records: Vec<_> = (0..10)
        .map(|i| LabeledImage::new(format!("{}.png", i), if i % 2 == 0 { "even" } else { "odd" }))
        .collect();

    let (train_a, test_a) = train_test_split(&records, 0.2, Some(3))?;
    let (train_b, test_b) = train_test_split(&records, 0.2, Some(3))?;
    assert_eq!(train_a, train_b);
    assert_eq!(test_a, test_b);
    assert_eq!(test_a.len(), 2);
    assert_eq!(test_a.iter().filter(|r| r.label == "even").count(), 1);
    assert_eq!(train_a.len() + test_a.len(), records.len());
    Ok(())
}
