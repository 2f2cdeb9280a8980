use assert_cmd::Command;
use paperglass_engine::test_fixtures;
use predicates::prelude::*;
use serde_json::Value;

fn paperglass() -> Command {
    Command::cargo_bin("paperglass").expect("binary should be built")
}

#[test]
fn info_emits_json_metadata() {
    let pdf = test_fixtures::multi_page_pdf(&[(595.0, 842.0), (842.0, 595.0)]);

    let output = paperglass()
        .arg(pdf.path())
        .arg("--info")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value: Value = serde_json::from_slice(&output).expect("stdout should contain valid json");
    assert_eq!(value["page_count"], 2);
    assert_eq!(value["first_page_size_pt"]["width"], 595.0);
    assert_eq!(value["first_page_size_pt"]["height"], 842.0);
    assert_eq!(value["path"], pdf.path().display().to_string());
}

#[test]
fn render_writes_a_png_of_the_viewport() {
    let pdf = test_fixtures::single_page_pdf(595.0, 842.0);
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let output_path = temp.path().join("frame.png");

    paperglass()
        .arg(pdf.path())
        .arg("--width")
        .arg("300")
        .arg("--height")
        .arg("200")
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("frame.png"));

    let image = image::open(&output_path).expect("frame should be a readable image");
    assert_eq!(image.width(), 300);
    assert_eq!(image.height(), 200);

    // Margins around the fitted page render white.
    let rgba = image.to_rgba8();
    assert_eq!(rgba.get_pixel(0, 100).0, [255, 255, 255, 255]);
}

#[test]
fn render_respects_dpr_for_pixel_dimensions() {
    let pdf = test_fixtures::single_page_pdf(595.0, 842.0);
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let output_path = temp.path().join("hidpi.png");

    paperglass()
        .arg(pdf.path())
        .arg("--width")
        .arg("160")
        .arg("--height")
        .arg("120")
        .arg("--dpr")
        .arg("2")
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success();

    let image = image::open(&output_path).expect("frame should be a readable image");
    assert_eq!((image.width(), image.height()), (320, 240));
}

#[test]
fn missing_file_fails_with_a_clear_error() {
    paperglass()
        .arg("/definitely/not/here.pdf")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn out_of_range_page_fails() {
    let pdf = test_fixtures::single_page_pdf(595.0, 842.0);

    paperglass()
        .arg(pdf.path())
        .arg("--page")
        .arg("7")
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}
