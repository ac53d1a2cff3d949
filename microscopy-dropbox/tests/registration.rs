mod common;

use std::fs;

use common::{manifest_xml, FakeReaders, Workspace, USER};
use microscopy_dropbox::dataset_config::IMAGE_DATASET_TYPE;
use microscopy_dropbox::error::Error;
use microscopy_dropbox::host::{Entity, TagRef, Transaction};
use microscopy_dropbox::processor::{
    ACCESSORY_TYPE, ATTACHMENT_TYPE, COLLECTION_NAME, CONTAINER_NAME, EXPERIMENT_SAMPLE_TYPE,
    FILE_SAMPLE_TYPE, NAME,
};
use microscopy_dropbox::settings::{ExperimentCreation, Settings};

fn single_file_workspace() -> Workspace {
    let mut ws = Workspace::new();
    ws.write("alice/EXP/cells.nd2", "pixels");
    ws.write("alice/notes.txt", "remember the laser");
    ws.manifest(
        "exp.xml",
        &manifest_xml(
            "/LAB/PROJ/EXP",
            r#"name="Exp 1" description="live imaging" tags="live, fixed" attachments="alice/notes.txt""#,
            r#"<MicroscopyFile relativeFileName="alice/EXP/cells.nd2" datasetSize="6" />"#,
        ),
    );
    ws
}

#[test]
fn single_file_becomes_container_and_contained_datasets() {
    let ws = single_file_workspace();
    let readers = FakeReaders::with_series(vec![vec!["DAPI", "GFP"], vec!["DAPI"], vec!["BF"]]);
    let (store, summary) = ws.register(&readers, &Settings::default()).unwrap();

    assert_eq!(summary.experiments.len(), 1);
    let experiment = &summary.experiments[0];
    assert_eq!(experiment.collection.identifier, "/LAB/PROJ/EXP");
    assert!(experiment.sample.identifier.starts_with("/LAB/PROJ/EXP_"));
    assert_eq!(experiment.files.len(), 1);

    let file = &experiment.files[0];
    assert_eq!(file.contained.len(), 2);
    let registry = store.registry();

    let container = &registry.datasets[&file.container];
    assert_eq!(container.dataset_type, IMAGE_DATASET_TYPE);
    assert_eq!(container.container, None);
    assert_eq!(
        container.files,
        vec![format!("datasets/{}/cells.nd2", file.container)]
    );
    assert_eq!(container.properties[CONTAINER_NAME], "Series 0");
    let config = container.image_config.as_ref().unwrap();
    assert_eq!(config["channels"].as_array().unwrap().len(), 2);
    assert_eq!(config["series"], 0);

    for code in &file.contained {
        let record = &registry.datasets[code];
        assert_eq!(record.container.as_ref(), Some(&file.container));
        assert!(record.files.is_empty());
        assert_eq!(record.sample.as_deref(), Some(file.sample.perm_id.as_str()));
    }
    assert_eq!(
        container.sample.as_deref(),
        Some(file.sample.perm_id.as_str())
    );

    assert!(!ws.incoming().join("alice/EXP/cells.nd2").exists());
    assert_eq!(
        fs::read_to_string(store.root().join(&container.files[0])).unwrap(),
        "pixels"
    );

    let sample = &registry.samples[&file.sample.perm_id];
    assert_eq!(sample.sample_type, FILE_SAMPLE_TYPE);
    assert_eq!(sample.parents, vec![experiment.sample.perm_id.clone()]);
    assert_eq!(sample.properties[NAME], "cells.nd2");
    assert_eq!(sample.properties["MICROSCOPY_SAMPLE_SIZE_IN_BYTES"], "6");
    assert!(sample.sample.identifier.starts_with("/LAB/PROJ/"));
}

#[test]
fn experiment_sample_carries_properties_tags_and_attachments() {
    let ws = single_file_workspace();
    let readers = FakeReaders::with_series(vec![vec!["DAPI"]]);
    let (store, summary) = ws.register(&readers, &Settings::default()).unwrap();
    let experiment = &summary.experiments[0];
    let registry = store.registry();

    let collection = &registry.experiments[&experiment.collection.perm_id];
    assert_eq!(collection.properties[NAME], COLLECTION_NAME);

    let sample = &registry.samples[&experiment.sample.perm_id];
    assert_eq!(sample.sample_type, EXPERIMENT_SAMPLE_TYPE);
    assert_eq!(sample.experiment.as_deref(), Some(experiment.collection.perm_id.as_str()));
    assert_eq!(sample.properties[NAME], "Exp 1");
    assert_eq!(sample.properties["MICROSCOPY_EXPERIMENT_DESCRIPTION"], "live imaging");
    assert_eq!(sample.properties["MICROSCOPY_EXPERIMENT_VERSION"], "2");
    assert_eq!(
        sample.properties["MICROSCOPY_EXPERIMENT_ACQ_HARDWARE_FRIENDLY_NAME"],
        "SP8"
    );
    let tag = |name: &str| TagRef {
        name: name.to_string(),
        owner: USER.to_string(),
    };
    assert_eq!(sample.tags, vec![tag("live"), tag("fixed")]);

    assert_eq!(experiment.attachments.len(), 1);
    let attachment = &registry.datasets[&experiment.attachments[0]];
    assert_eq!(attachment.dataset_type, ATTACHMENT_TYPE);
    assert_eq!(attachment.properties[NAME], "notes.txt");
    assert_eq!(
        fs::read_to_string(store.root().join(&attachment.files[0])).unwrap(),
        "remember the laser"
    );
}

#[test]
fn pre_parsed_series_skip_the_reader() {
    let mut ws = Workspace::new();
    ws.write("alice/EXP/parsed.tif", "pixels");
    ws.manifest(
        "exp.xml",
        &manifest_xml(
            "/LAB/PROJ/EXP",
            r#"name="Parsed""#,
            r#"<MicroscopyFile relativeFileName="alice/EXP/parsed.tif">
                 <MicroscopyFileSeries name="s0" sizeC="1" channelName0="DAPI" />
                 <MicroscopyFileSeries name="s1" sizeC="1" channelName0="GFP" channelColor0="0,255,0,255" />
               </MicroscopyFile>"#,
        ),
    );
    let (store, summary) = ws
        .register(&FakeReaders::failing(), &Settings::default())
        .unwrap();
    let file = &summary.experiments[0].files[0];
    assert_eq!(file.contained.len(), 1);

    let contained = &store.registry().datasets[&file.contained[0]];
    assert_eq!(contained.properties[CONTAINER_NAME], "s1");
    let channel = &contained.image_config.as_ref().unwrap()["channels"][0];
    assert_eq!(channel["name"], "GFP");
    assert_eq!(channel["color"], serde_json::json!([0, 255, 0]));
}

#[test]
fn unreadable_file_without_series_fails() {
    let ws = single_file_workspace();
    let err = ws
        .register(&FakeReaders::failing(), &Settings::default())
        .unwrap_err();
    assert!(matches!(err, Error::Reader { .. }));
}

#[test]
fn generic_tiff_folder_is_split_by_series() {
    let mut ws = Workspace::new();
    for name in [
        "run_Series0_z0_ch0.tif",
        "run_Series0_z1_ch0.tif",
        "run_Series0_z0_ch1.tif",
        "run_Series1_z0_ch0.tif",
        "readme.txt",
    ] {
        ws.write(&format!("alice/EXP/run/{}", name), "x");
    }
    ws.manifest(
        "exp.xml",
        &manifest_xml(
            "/LAB/PROJ/EXP",
            r#"name="Tiles""#,
            r#"<MicroscopyCompositeFile compositeFileType="Generic TIFF Series"
                    relativeFolder="alice/EXP/run" seriesIndices="0,1" name="run">
                 <MicroscopyCompositeFileSeries name="first" channelName0="DAPI" channelName1="GFP" />
                 <MicroscopyCompositeFileSeries name="" channelName0="BF" />
               </MicroscopyCompositeFile>"#,
        ),
    );
    let (store, summary) = ws
        .register(&FakeReaders::failing(), &Settings::default())
        .unwrap();
    let file = &summary.experiments[0].files[0];
    assert_eq!(file.contained.len(), 1);
    assert!(file.accessory.is_empty());
    let registry = store.registry();

    let container = &registry.datasets[&file.container];
    let config = container.image_config.as_ref().unwrap();
    assert_eq!(config["images"].as_array().unwrap().len(), 3);
    assert_eq!(config["channels"].as_array().unwrap().len(), 2);
    assert_eq!(config["channels"][1]["code"], "SERIES-0_CHANNEL-1");
    assert_eq!(container.properties[CONTAINER_NAME], "first");
    assert_eq!(container.files, vec![format!("datasets/{}/run", file.container)]);

    let contained = &registry.datasets[&file.contained[0]];
    let config = contained.image_config.as_ref().unwrap();
    assert_eq!(config["images"].as_array().unwrap().len(), 1);
    assert_eq!(config["images"][0]["path"], "run_Series1_z0_ch0.tif");
    assert_eq!(contained.properties[CONTAINER_NAME], "series_1");

    assert!(!ws.incoming().join("alice/EXP/run").exists());
    assert!(store
        .root()
        .join(&container.files[0])
        .join("readme.txt")
        .is_file());

    let sample = &registry.samples[&file.sample.perm_id];
    assert_eq!(sample.properties[NAME], "run");
}

#[test]
fn leica_series_use_unit_colors_and_fixed_thumbnails() {
    let mut ws = Workspace::new();
    ws.write("alice/EXP/lc/lc_Series0_z0_ch0.tif", "a");
    ws.write("alice/EXP/lc/lc_Series0_z1_ch0.tif", "b");
    ws.manifest(
        "exp.xml",
        &manifest_xml(
            "/LAB/PROJ/EXP",
            r#"name="Stack""#,
            r#"<MicroscopyCompositeFile compositeFileType="Leica TIFF Series"
                    relativeFolder="alice/EXP/lc" seriesIndices="0" name="lc">
                 <MicroscopyCompositeFileSeries name="stack" channelName0="GFP" channelColor0="0.5,1.0,0" />
               </MicroscopyCompositeFile>"#,
        ),
    );
    let (store, summary) = ws
        .register(&FakeReaders::failing(), &Settings::default())
        .unwrap();
    let file = &summary.experiments[0].files[0];
    assert!(file.contained.is_empty());

    let container = &store.registry().datasets[&file.container];
    let config = container.image_config.as_ref().unwrap();
    assert_eq!(config["images"].as_array().unwrap().len(), 2);
    assert_eq!(config["images"][1]["plane"], 1);
    assert_eq!(config["channels"].as_array().unwrap().len(), 1);
    assert_eq!(config["channels"][0]["name"], "GFP");
    assert_eq!(config["channels"][0]["color"], serde_json::json!([127, 255, 0]));

    let thumbnails = &config["thumbnails"];
    assert_eq!(thumbnails["generate"], true);
    assert_eq!(thumbnails["resolutions"], serde_json::json!(["128x128", "256x256"]));
    assert!(thumbnails["representative"].is_object());
}

#[test]
fn visitron_markers_shift_to_zero_based_codes() {
    let mut ws = Workspace::new();
    ws.write("alice/EXP/nd/cells_w1GFP_s1_t1.stk", "g");
    ws.write("alice/EXP/nd/cells_w2RFP_s1_t2.stk", "r");
    ws.write("alice/EXP/nd/cells_w1GFP_s2_t1.stk", "g");
    ws.manifest(
        "exp.xml",
        &manifest_xml(
            "/LAB/PROJ/EXP",
            r#"name="Positions""#,
            r#"<MicroscopyCompositeFile compositeFileType="Visitron ND"
                    relativeFolder="alice/EXP/nd" seriesIndices="0,1" name="nd">
                 <MicroscopyCompositeFileSeries name="pos1" channelName0="GFP" channelName1="RFP"
                     channelColor1="0,0,255,255" />
                 <MicroscopyCompositeFileSeries name="pos2" channelName0="GFP" />
               </MicroscopyCompositeFile>"#,
        ),
    );
    let (store, summary) = ws
        .register(&FakeReaders::failing(), &Settings::default())
        .unwrap();
    let file = &summary.experiments[0].files[0];
    assert_eq!(file.contained.len(), 1);
    let registry = store.registry();

    let container = &registry.datasets[&file.container];
    let config = container.image_config.as_ref().unwrap();
    let images = config["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0]["path"], "cells_w1GFP_s1_t1.stk");
    assert_eq!(images[0]["channel_code"], "SERIES-0_CHANNEL-0");
    assert_eq!(images[0]["timepoint"], 0);
    assert_eq!(images[1]["channel_code"], "SERIES-0_CHANNEL-1");
    assert_eq!(images[1]["timepoint"], 1);
    assert_eq!(config["channels"][0]["color"], serde_json::json!([255, 0, 0]));
    assert_eq!(config["channels"][1]["color"], serde_json::json!([0, 0, 255]));
    assert_eq!(config["thumbnails"]["generate"], false);

    let contained = &registry.datasets[&file.contained[0]];
    let config = contained.image_config.as_ref().unwrap();
    let images = config["images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["channel_code"], "SERIES-1_CHANNEL-0");
    assert_eq!(config["channels"][0]["color"], serde_json::json!([255, 255, 255]));
    assert!(config["thumbnails"]["representative"].is_null());
}

const IMAGES_CSV: &str = "\
\"evaluation\";\"time\";\"ms\";\"date\";\"well\";\"position\";\"file\";\"camera\";\"measurement\";\"channel group\";\"channel\"
\"1\";\"0\";\"0\";\"x\";\"A1\";\"y-tile: 1, x-tile: 2\";\"img_position010102_time0001.tif\";\"cam\";\"m\";\"Fluo\";\"GFP\"
\"1\";\"0\";\"0\";\"x\";\"A1\";\"y-tile: 1, x-tile: 2\";\"img_position010102_time0002.tif\";\"cam\";\"m\";\"Fluo\";\"RFP\"
";

#[test]
fn youscope_accessory_files_are_registered_separately() {
    let mut ws = Workspace::new();
    ws.write("alice/EXP/ys/images.csv", IMAGES_CSV);
    ws.write("alice/EXP/ys/experiment.xml", "<ys/>");
    ws.write("alice/EXP/ys/img_position010102_time0001.tif", "g");
    ws.write("alice/EXP/ys/img_position010102_time0002.tif", "r");
    ws.manifest(
        "exp.xml",
        &manifest_xml(
            "/LAB/PROJ/EXP",
            r#"name="Screen""#,
            r#"<MicroscopyCompositeFile compositeFileType="YouScope Experiment"
                    relativeFolder="alice/EXP/ys" seriesIndices="0" name="ys">
                 <MicroscopyCompositeFileSeries name="A1" uniqueSeriesID="Well_A1_Pos_2_1_Path_."
                     channelName0="cam_Fluo_GFP" channelName1="cam_Fluo_RFP" />
               </MicroscopyCompositeFile>"#,
        ),
    );
    let (store, summary) = ws
        .register(&FakeReaders::failing(), &Settings::default())
        .unwrap();
    let file = &summary.experiments[0].files[0];
    assert!(file.contained.is_empty());
    assert_eq!(file.accessory.len(), 2);
    let registry = store.registry();

    let names: Vec<&str> = file
        .accessory
        .iter()
        .map(move |code| {
            let record = &registry.datasets[code];
            assert_eq!(record.dataset_type, ACCESSORY_TYPE);
            assert_eq!(record.parents, vec![file.container.clone()]);
            record.properties["MICROSCOPY_ACCESSORY_FILE_NAME"].as_str()
        })
        .collect();
    assert_eq!(names, vec!["experiment.xml", "images.csv"]);
    let accessory = &registry.datasets[&file.accessory[0]];
    assert_eq!(
        accessory.files,
        vec![format!("datasets/{}/original/ys/experiment.xml", file.accessory[0])]
    );

    let container = &registry.datasets[&file.container];
    let config = container.image_config.as_ref().unwrap();
    let images = config["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[1]["channel_code"], "SERIES-0_CHANNEL-1");
    assert_eq!(images[1]["well"], "A1");

    let folder = store.root().join(&container.files[0]);
    assert!(folder.join("img_position010102_time0001.tif").is_file());
    assert!(!folder.join("images.csv").exists());
    assert_eq!(store.datasets_of_type(ACCESSORY_TYPE).count(), 2);
}

#[test]
fn collections_are_reused_across_runs() {
    let readers = FakeReaders::with_series(vec![vec!["DAPI"]]);
    let ws = single_file_workspace();
    let (_, first) = ws.register(&readers, &Settings::default()).unwrap();

    ws.write("alice/EXP/cells.nd2", "more pixels");
    ws.write("alice/notes.txt", "again");
    let (store, second) = ws.register(&readers, &Settings::default()).unwrap();

    assert_eq!(
        first.experiments[0].collection,
        second.experiments[0].collection
    );
    assert_ne!(first.experiments[0].sample, second.experiments[0].sample);
    assert_eq!(store.registry().experiments.len(), 1);
    assert_eq!(store.samples_of_type(EXPERIMENT_SAMPLE_TYPE).count(), 2);

    let reopened = ws.open_store();
    assert!(reopened
        .get_experiment("/LAB/PROJ/EXP")
        .unwrap()
        .is_some());
    assert_eq!(reopened.samples_of_type(FILE_SAMPLE_TYPE).count(), 2);
}

#[test]
fn unique_creation_makes_a_new_collection_each_run() {
    let readers = FakeReaders::with_series(vec![vec!["DAPI"]]);
    let settings = Settings {
        experiment_creation: ExperimentCreation::CreateUnique,
        ..Settings::default()
    };
    let ws = single_file_workspace();
    let (_, first) = ws.register(&readers, &settings).unwrap();
    ws.write("alice/EXP/cells.nd2", "more pixels");
    ws.write("alice/notes.txt", "again");
    let (store, second) = ws.register(&readers, &settings).unwrap();

    let a = &first.experiments[0].collection.identifier;
    let b = &second.experiments[0].collection.identifier;
    assert_ne!(a, b);
    assert!(a.starts_with("/LAB/PROJ/EXP_"));
    assert_eq!(store.registry().experiments.len(), 2);
}

#[test]
fn space_samples_drop_the_project() {
    let readers = FakeReaders::with_series(vec![vec!["DAPI"]]);
    let settings = Settings {
        project_samples_enabled: false,
        ..Settings::default()
    };
    let ws = single_file_workspace();
    let (store, summary) = ws.register(&readers, &settings).unwrap();
    let experiment = &summary.experiments[0];
    assert!(experiment.sample.identifier.starts_with("/LAB/EXP_"));
    assert!(experiment.files[0].sample.identifier.starts_with("/LAB/S"));
    assert_eq!(
        store
            .property(Entity::Sample(&experiment.sample), NAME)
            .unwrap()
            .as_deref(),
        Some("Exp 1")
    );
}

#[test]
fn incoming_needs_exactly_one_user_folder() {
    let ws = single_file_workspace();
    fs::create_dir_all(ws.incoming().join("bob")).unwrap();
    let err = ws
        .register(&FakeReaders::default(), &Settings::default())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidIncoming { .. }));
}

#[test]
fn missing_index_is_rejected() {
    let ws = Workspace::new();
    let err = ws
        .register(&FakeReaders::default(), &Settings::default())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidIncoming { ref reason, .. } if reason.contains("data_structure.ois")));
}

#[test]
fn wrong_root_tag_aborts_before_any_change() {
    let mut ws = Workspace::new();
    ws.manifest("bad.xml", r#"<experiments version="2"/>"#);
    let err = ws
        .register(&FakeReaders::default(), &Settings::default())
        .unwrap_err();
    assert!(matches!(err, Error::UnexpectedTag { .. }));
    assert!(ws.open_store().registry().samples.is_empty());
}

#[test]
fn failed_later_manifest_leaves_incoming_untouched() {
    let mut ws = single_file_workspace();
    ws.manifest("bad.xml", r#"<wrongRoot version="2"/>"#);
    let readers = FakeReaders::with_series(vec![vec!["DAPI"]]);
    let err = ws.register(&readers, &Settings::default()).unwrap_err();
    assert!(matches!(err, Error::UnexpectedTag { .. }));

    assert_eq!(
        fs::read_to_string(ws.incoming().join("alice/EXP/cells.nd2")).unwrap(),
        "pixels"
    );
    assert!(ws.incoming().join("alice/notes.txt").is_file());
    assert!(!ws.store_dir().join("datasets").exists());
    assert!(ws.open_store().registry().samples.is_empty());
}

#[test]
fn unknown_collection_identifier_is_rejected() {
    let mut ws = Workspace::new();
    ws.manifest(
        "exp.xml",
        &manifest_xml("/LAB/EXP", r#"name="x""#, ""),
    );
    let err = ws
        .register(&FakeReaders::default(), &Settings::default())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(id) if id == "/LAB/EXP"));
}
