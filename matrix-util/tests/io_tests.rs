use matrix_util::common_io::create_temp_dir_file;
use matrix_util::traits::{IoOps, SampleOps};
use nalgebra::DMatrix;

#[test]
fn named_tsv_gz_round_trip() -> anyhow::Result<()> {
    let xx = DMatrix::<f32>::runif(20, 3);
    let rows: Vec<Box<str>> = (0..20).map(|i| format!("cell_{}", i).into()).collect();
    let cols: Vec<Box<str>> = vec!["CD3".into(), "CD4".into(), "CD8".into()];

    let file = create_temp_dir_file(".tsv.gz")?;
    let file = file.to_str().unwrap();
    xx.write_named(file, "cell", &rows, &cols)?;

    let named = DMatrix::<f32>::read_named(file, '\t')?;
    assert_eq!(named.rows, rows);
    assert_eq!(named.cols, cols);
    approx::assert_abs_diff_eq!(named.mat, xx, epsilon = 1e-6);
    Ok(())
}

#[test]
fn named_csv_rejects_ragged_rows() -> anyhow::Result<()> {
    let file = create_temp_dir_file(".csv")?;
    let file = file.to_str().unwrap();
    matrix_util::common_io::write_lines(&["cell,a,b", "c1,1,2", "c2,3"], file)?;

    let res = DMatrix::<f32>::read_named(file, ',');
    assert!(res.is_err());
    Ok(())
}

#[test]
fn named_rejects_non_numeric() -> anyhow::Result<()> {
    let file = create_temp_dir_file(".tsv")?;
    let file = file.to_str().unwrap();
    matrix_util::common_io::write_lines(&["cell\ta", "c1\tNA_value"], file)?;

    let err = DMatrix::<f32>::read_named(file, '\t').unwrap_err();
    assert!(err.to_string().contains("cannot parse"));
    Ok(())
}
