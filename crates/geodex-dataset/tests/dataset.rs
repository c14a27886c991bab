//! End-to-end tests over GeoTIFF tiles written to a temporary directory.

use approx::assert_relative_eq;
use geodex_dataset::{
    intersect, unite, ConfigError, DatasetConfig, DatasetError, LabelConfig, LabeledDataset,
    RasterDataset,
};
use geodex_index::BoundingVolume;
use geodex_raster::{geotiff, CachePolicy, Crs, GeoTransform, NodataCheck};
use ndarray::Array3;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write a square tile in Web Mercator whose lower-left corner is `(x, y)`.
fn tile(dir: &Path, name: &str, x: f64, y: f64, size: usize, res: f64, bands: usize, value: f32) {
    fs::create_dir_all(dir).unwrap();
    let data = Array3::from_elem((bands, size, size), value);
    let transform = GeoTransform::north_up(x, y + size as f64 * res, res, res);
    geotiff::write(&dir.join(name), &data, &transform, Crs::WEB_MERCATOR, None).unwrap();
}

fn query(minx: f64, maxx: f64, miny: f64, maxy: f64) -> BoundingVolume {
    BoundingVolume::spatial(minx, maxx, miny, maxy).unwrap()
}

/// 2x2 tiles of 8 pixels at 1 m, valued 1 to 4 row by row from the bottom.
fn grid_of_four() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    tile(dir.path(), "t1.tif", 0.0, 0.0, 8, 1.0, 1, 1.0);
    tile(dir.path(), "t2.tif", 8.0, 0.0, 8, 1.0, 1, 2.0);
    tile(dir.path(), "t3.tif", 0.0, 8.0, 8, 1.0, 1, 3.0);
    tile(dir.path(), "t4.tif", 8.0, 8.0, 8, 1.0, 1, 4.0);
    dir
}

#[test]
fn test_tiled_region_composites_without_gaps() {
    let dir = grid_of_four();
    let dataset = RasterDataset::builder(dir.path()).build().unwrap();

    assert_eq!(dataset.len(), 4);
    assert_eq!(dataset.crs(), Crs::WEB_MERCATOR);
    let b = dataset.bounds();
    assert_eq!((b.minx(), b.maxx(), b.miny(), b.maxy()), (0.0, 16.0, 0.0, 16.0));

    let sample = dataset.get(&query(0.0, 16.0, 0.0, 16.0)).unwrap();
    let image = sample.image.unwrap();
    assert_eq!(image.dim(), (1, 16, 16));
    assert!(image.iter().all(|&v| v > 0.0));
    // Row 0 is the northern edge.
    assert_eq!(image[[0, 0, 0]], 3.0);
    assert_eq!(image[[0, 0, 15]], 4.0);
    assert_eq!(image[[0, 15, 0]], 1.0);
    assert_eq!(image[[0, 15, 15]], 2.0);
    assert!(sample.mask.is_none());
}

#[test]
fn test_query_across_seam() {
    let dir = grid_of_four();
    let dataset = RasterDataset::builder(dir.path()).build().unwrap();

    let image = dataset.get(&query(6.0, 10.0, 2.0, 4.0)).unwrap().image.unwrap();
    assert_eq!(image.dim(), (1, 2, 4));
    let first_row: Vec<f32> = (0..4).map(|col| image[[0, 0, col]]).collect();
    assert_eq!(first_row, vec![1.0, 1.0, 2.0, 2.0]);
}

#[test]
fn test_query_outside_is_not_found() {
    let dir = grid_of_four();
    let dataset = RasterDataset::builder(dir.path()).build().unwrap();

    let err = dataset.get(&query(100.0, 110.0, 100.0, 110.0)).unwrap_err();
    assert!(err.is_query_miss());
    assert!(matches!(err, DatasetError::QueryNotFound { .. }));

    // Touching edges do not overlap.
    assert!(dataset.get(&query(16.0, 20.0, 0.0, 4.0)).is_err());
}

#[test]
fn test_empty_root_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = RasterDataset::builder(dir.path()).build().unwrap_err();
    assert!(matches!(err, DatasetError::NotFound { .. }));
    assert!(err.to_string().starts_with("Dataset not found"));
}

#[test]
fn test_glob_filters_files() {
    let dir = grid_of_four();
    fs::write(dir.path().join("notes.txt"), "not a raster").unwrap();
    let dataset = RasterDataset::builder(dir.path())
        .filename_glob("t[12].tif")
        .build()
        .unwrap();
    let names: Vec<_> = dataset
        .files()
        .map(|(path, _)| path.file_name().unwrap().to_owned())
        .collect();
    assert_eq!(names, vec!["t1.tif", "t2.tif"]);
    assert_eq!(dataset.bounds().maxy(), 8.0);

    let err = RasterDataset::builder(dir.path())
        .filename_glob("t[1.tif")
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        DatasetError::Config(ConfigError::InvalidValue { field: "filename_glob", .. })
    ));

    let dataset = RasterDataset::builder(dir.path())
        .filename_glob("t?.tif")
        .build()
        .unwrap();
    assert_eq!(dataset.len(), 4);
    assert!(dataset.scan_report().skipped.is_empty());
}

#[test]
fn test_regex_filters_and_dates_files() {
    let dir = tempfile::tempdir().unwrap();
    tile(dir.path(), "CMS_Mangrove_Canopy_2000_a.tif", 0.0, 0.0, 8, 1.0, 1, 1.0);
    tile(dir.path(), "CMS_Mangrove_Canopy_2016_b.tif", 8.0, 0.0, 8, 1.0, 1, 2.0);
    tile(dir.path(), "other_2000.tif", 0.0, 8.0, 8, 1.0, 1, 3.0);

    let dataset = RasterDataset::builder(dir.path())
        .filename_glob("*.tif")
        .filename_regex(r"CMS_Mangrove_Canopy_(?P<date>\d{4})_")
        .date_format("%Y")
        .build()
        .unwrap();
    assert_eq!(dataset.len(), 2);

    let year_2000 = (946_684_800.0, 978_307_200.0);
    let volumes: Vec<_> = dataset.files().map(|(_, v)| (v.mint(), v.maxt())).collect();
    assert_eq!(volumes[0], year_2000);
    assert_eq!(volumes[1].0, 1_451_606_400.0);

    let in_2000 = BoundingVolume::new(0.0, 16.0, 0.0, 8.0, year_2000.0, year_2000.1 - 1.0).unwrap();
    let image = dataset.get(&in_2000).unwrap().image.unwrap();
    assert_eq!(image[[0, 0, 0]], 1.0);
    assert_eq!(image[[0, 0, 15]], 0.0);

    let err = RasterDataset::builder(dir.path())
        .filename_regex("(")
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        DatasetError::Config(ConfigError::InvalidValue { field: "filename_regex", .. })
    ));
}

#[test]
fn test_file_removed_after_indexing_contributes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    tile(dir.path(), "a.tif", 0.0, 0.0, 8, 1.0, 1, 1.0);
    tile(dir.path(), "b.tif", 8.0, 0.0, 8, 1.0, 1, 2.0);
    let dataset = RasterDataset::builder(dir.path())
        .cache(CachePolicy::Disabled)
        .build()
        .unwrap();
    assert_eq!(dataset.len(), 2);

    fs::remove_file(dir.path().join("b.tif")).unwrap();
    let image = dataset.get(&query(6.0, 10.0, 0.0, 2.0)).unwrap().image.unwrap();
    let row: Vec<f32> = (0..4).map(|c| image[[0, 0, c]]).collect();
    assert_eq!(row, vec![1.0, 1.0, 0.0, 0.0]);

    // Only the missing file intersects.
    let err = dataset.get(&query(10.0, 12.0, 0.0, 2.0)).unwrap_err();
    assert!(err.is_query_miss());
}

#[test]
fn test_all_files_unreadable_after_indexing_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    tile(dir.path(), "a.tif", 0.0, 0.0, 8, 1.0, 1, 1.0);
    tile(dir.path(), "b.tif", 8.0, 0.0, 8, 1.0, 1, 2.0);
    let dataset = RasterDataset::builder(dir.path())
        .cache(CachePolicy::Disabled)
        .build()
        .unwrap();

    fs::remove_file(dir.path().join("a.tif")).unwrap();
    fs::write(dir.path().join("b.tif"), b"truncated").unwrap();
    let err = dataset.get(&query(0.0, 16.0, 0.0, 8.0)).unwrap_err();
    assert!(matches!(err, DatasetError::QueryNotFound { .. }));
}

#[test]
fn test_unreadable_and_unprojectable_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    tile(dir.path(), "a.tif", 0.0, 0.0, 8, 1.0, 1, 1.0);
    fs::write(dir.path().join("b.tif"), b"not a tiff").unwrap();

    let utm = Array3::from_elem((1, 4, 4), 1.0);
    let transform = GeoTransform::north_up(500_000.0, 4_000_004.0, 1.0, 1.0);
    geotiff::write(
        &dir.path().join("c.tif"),
        &utm,
        &transform,
        Crs::from_epsg(32618),
        None,
    )
    .unwrap();

    let dataset = RasterDataset::builder(dir.path()).build().unwrap();
    assert_eq!(dataset.len(), 1);

    let report = dataset.scan_report();
    assert_eq!(report.indexed, 1);
    let skipped: Vec<_> = report
        .skipped
        .iter()
        .map(|s| s.path.file_name().unwrap().to_str().unwrap())
        .collect();
    assert_eq!(skipped, vec!["b.tif", "c.tif"]);
}

#[test]
fn test_first_file_sets_target_grid() {
    let dir = tempfile::tempdir().unwrap();
    tile(dir.path(), "a.tif", 0.0, 0.0, 8, 1.0, 1, 1.0);
    tile(dir.path(), "b.tif", 8.0, 0.0, 4, 2.0, 1, 2.0);

    let dataset = RasterDataset::builder(dir.path()).build().unwrap();
    assert_eq!(dataset.crs(), Crs::WEB_MERCATOR);
    assert_eq!(dataset.res(), 1.0);

    // The coarser tile is resampled onto the 1 m grid.
    let image = dataset.get(&query(8.0, 16.0, 0.0, 8.0)).unwrap().image.unwrap();
    assert_eq!(image.dim(), (1, 8, 8));
    assert!(image.iter().all(|&v| v == 2.0));
}

#[test]
fn test_explicit_resolution_overrides_files() {
    let dir = grid_of_four();
    let dataset = RasterDataset::builder(dir.path()).res(2.0).build().unwrap();
    assert_eq!(dataset.res(), 2.0);
    let image = dataset.get(&query(0.0, 16.0, 0.0, 16.0)).unwrap().image.unwrap();
    assert_eq!(image.dim(), (1, 8, 8));
}

#[test]
fn test_invalid_resolution_rejected() {
    let dir = grid_of_four();
    let err = RasterDataset::builder(dir.path()).res(0.0).build().unwrap_err();
    assert!(matches!(
        err,
        DatasetError::Config(ConfigError::InvalidValue { field: "res", .. })
    ));
}

#[test]
fn test_dates_restrict_queries_in_time() {
    let dir = tempfile::tempdir().unwrap();
    tile(dir.path(), "m_20130924.tif", 0.0, 0.0, 4, 1.0, 1, 1.0);
    tile(dir.path(), "m_20150601.tif", 0.0, 0.0, 4, 1.0, 1, 2.0);

    let dataset = RasterDataset::builder(dir.path())
        .date_format("%Y%m%d")
        .build()
        .unwrap();
    assert_eq!(dataset.bounds().mint(), 1_379_980_800.0);

    // Whole of 2013.
    let in_2013 = BoundingVolume::new(0.0, 4.0, 0.0, 4.0, 1_356_998_400.0, 1_388_534_400.0).unwrap();
    let image = dataset.get(&in_2013).unwrap().image.unwrap();
    assert!(image.iter().all(|&v| v == 1.0));

    // Both overlap the full time range; the later file wins.
    let image = dataset.get(&query(0.0, 4.0, 0.0, 4.0)).unwrap().image.unwrap();
    assert!(image.iter().all(|&v| v == 2.0));

    let in_2020 = BoundingVolume::new(0.0, 4.0, 0.0, 4.0, 1_577_836_800.0, 1_609_459_200.0).unwrap();
    assert!(dataset.get(&in_2020).unwrap_err().is_query_miss());
}

#[test]
fn test_bounded_cache_evicts() {
    let dir = grid_of_four();
    let dataset = RasterDataset::builder(dir.path())
        .cache(CachePolicy::with_capacity(1))
        .build()
        .unwrap();

    dataset.get(&query(0.0, 4.0, 0.0, 4.0)).unwrap();
    dataset.get(&query(12.0, 16.0, 12.0, 16.0)).unwrap();
    dataset.get(&query(0.0, 4.0, 0.0, 4.0)).unwrap();

    let stats = dataset.cache_stats();
    assert_eq!(stats.hits, 0);
    assert!(stats.evictions >= 5);
}

#[test]
fn test_default_cache_reuses_handles() {
    let dir = grid_of_four();
    let dataset = RasterDataset::builder(dir.path()).build().unwrap();
    dataset.get(&query(0.0, 4.0, 0.0, 4.0)).unwrap();
    dataset.get(&query(0.0, 4.0, 0.0, 4.0)).unwrap();

    let stats = dataset.cache_stats();
    assert_eq!(stats.opens, 4);
    assert_eq!(stats.evictions, 0);
    assert!(stats.hits >= 2);
}

#[test]
fn test_nodata_check_pads_small_samples() {
    let dir = grid_of_four();
    let dataset = RasterDataset::builder(dir.path())
        .transform(NodataCheck::new(16))
        .build()
        .unwrap();

    let image = dataset.get(&query(0.0, 4.0, 0.0, 4.0)).unwrap().image.unwrap();
    assert_eq!(image.dim(), (1, 16, 16));
    assert!(image.iter().all(|&v| v == 0.0));

    let image = dataset.get(&query(0.0, 16.0, 0.0, 16.0)).unwrap().image.unwrap();
    assert!(image.iter().all(|&v| v > 0.0));
}

/// `naip` covers x in [0, 8), `lc` covers x in [0, 16).
fn image_and_labels() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    tile(&dir.path().join("naip"), "n.tif", 0.0, 0.0, 8, 1.0, 3, 10.0);
    tile(&dir.path().join("lc"), "l1.tif", 0.0, 0.0, 8, 1.0, 1, 5.0);
    tile(&dir.path().join("lc"), "l2.tif", 8.0, 0.0, 8, 1.0, 1, 2.0);
    dir
}

#[test]
fn test_intersection_needs_both() {
    let dir = image_and_labels();
    let naip = RasterDataset::builder(dir.path())
        .categories(["naip"])
        .build()
        .unwrap();
    let lc = RasterDataset::builder(dir.path())
        .categories(["lc"])
        .is_image(false)
        .build()
        .unwrap();

    let both = intersect(naip, lc).unwrap();
    assert_eq!(both.len(), 3);
    assert_eq!(both.bounds().maxx(), 8.0);

    let sample = both.get(&query(0.0, 4.0, 0.0, 4.0)).unwrap();
    assert_eq!(sample.image.as_ref().unwrap().dim(), (3, 4, 4));
    assert_eq!(sample.mask.as_ref().unwrap().dim(), (4, 4));
    assert!(sample.mask.unwrap().iter().all(|&v| v == 5.0));

    let err = both.get(&query(10.0, 12.0, 0.0, 4.0)).unwrap_err();
    assert!(err.is_query_miss());
}

#[test]
fn test_union_answers_from_either() {
    let dir = tempfile::tempdir().unwrap();
    tile(&dir.path().join("a"), "a.tif", 0.0, 0.0, 8, 1.0, 1, 1.0);
    tile(&dir.path().join("b"), "b.tif", 8.0, 0.0, 8, 1.0, 1, 2.0);
    let a = RasterDataset::builder(dir.path()).categories(["a"]).build().unwrap();
    let b = RasterDataset::builder(dir.path()).categories(["b"]).build().unwrap();

    let either = unite(a, b).unwrap();
    assert_eq!(either.bounds().maxx(), 16.0);

    let image = either.get(&query(10.0, 12.0, 0.0, 2.0)).unwrap().image.unwrap();
    assert_eq!(image.dim(), (1, 2, 2));
    assert!(image.iter().all(|&v| v == 2.0));

    // Both answer across the seam; coverage is combined, bands are not.
    let image = either.get(&query(6.0, 10.0, 0.0, 2.0)).unwrap().image.unwrap();
    assert_eq!(image.dim(), (1, 2, 4));
    let row: Vec<f32> = (0..4).map(|c| image[[0, 0, c]]).collect();
    assert_eq!(row, vec![1.0, 1.0, 2.0, 2.0]);

    assert!(either.get(&query(20.0, 24.0, 0.0, 2.0)).unwrap_err().is_query_miss());
}

#[test]
fn test_composition_requires_same_crs() {
    let dir = image_and_labels();
    let mercator = RasterDataset::builder(dir.path())
        .categories(["naip"])
        .build()
        .unwrap();
    let geographic = RasterDataset::builder(dir.path())
        .categories(["lc"])
        .crs(Crs::WGS84)
        .build()
        .unwrap();
    assert_eq!(geographic.crs(), Crs::WGS84);
    // One metre of easting at the equator, in degrees.
    assert_relative_eq!(geographic.res(), 1.0 / 111_319.490_793_273_6, max_relative = 1e-6);

    let err = unite(mercator, geographic).unwrap_err();
    assert!(matches!(
        err,
        DatasetError::Config(ConfigError::CrsMismatch { .. })
    ));
}

#[test]
fn test_composition_requires_same_resolution() {
    let dir = image_and_labels();
    let fine = RasterDataset::builder(dir.path()).categories(["naip"]).build().unwrap();
    let coarse = RasterDataset::builder(dir.path())
        .categories(["lc"])
        .res(2.0)
        .build()
        .unwrap();
    let err = intersect(fine, coarse).unwrap_err();
    assert!(matches!(
        err,
        DatasetError::Config(ConfigError::ResolutionMismatch { .. })
    ));
}

#[test]
fn test_labeled_dataset_remaps_five_classes() {
    let dir = image_and_labels();
    let labeled = LabeledDataset::builder(dir.path(), LabelConfig::default())
        .build()
        .unwrap();

    let sample = labeled.get(&query(0.0, 4.0, 0.0, 4.0)).unwrap();
    assert!(sample.image.unwrap().iter().all(|&v| v == 10.0));
    assert!(sample.mask.unwrap().iter().all(|&v| v == 4.0));

    let seven = LabeledDataset::builder(dir.path(), LabelConfig::new(7, false))
        .build()
        .unwrap();
    let mask = seven.get(&query(0.0, 4.0, 0.0, 4.0)).unwrap().mask.unwrap();
    assert!(mask.iter().all(|&v| v == 5.0));
}

#[test]
fn test_prior_labels_with_seven_classes_rejected() {
    let dir = image_and_labels();
    let yaml = format!(
        "root: {}\nlabels:\n  class_set: 7\n  use_prior_labels: true\n",
        dir.path().display()
    );
    let err = DatasetConfig::from_yaml_str(&yaml).unwrap_err();
    assert!(err.to_string().contains("use_prior_labels"));
}

#[test]
fn test_config_builds_labeled_dataset() {
    let dir = image_and_labels();
    let yaml = format!(
        "root: {}\ncache_capacity: 2\npatch_size: 4\nlabels:\n  class_set: 5\n",
        dir.path().display()
    );
    let config = DatasetConfig::from_yaml_str(&yaml).unwrap();
    let dataset = config.build().unwrap();
    assert_eq!(dataset.leaves().len(), 2);

    let sample = dataset.get(&query(0.0, 2.0, 0.0, 2.0)).unwrap();
    assert_eq!(sample.image.unwrap().dim(), (3, 4, 4));
    assert_eq!(sample.mask.unwrap().dim(), (4, 4));
}

#[test]
fn test_missing_category_directory_is_skipped() {
    let dir = image_and_labels();
    let dataset = RasterDataset::builder(dir.path())
        .categories(["naip", "missing"])
        .build()
        .unwrap();
    assert_eq!(dataset.len(), 1);
}
