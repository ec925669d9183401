//! Enrollment ingestion: yearly `.rar` archives from the ministry's open
//! data index, one wide delimited table per archive.

use std::sync::Arc;

use vij_core::ColumnMapping;
use vij_storage::{ArchiveExtractor, HttpFetcher};

use crate::config::Config;
use crate::ledger::SqlLedger;
use crate::load::SqlLoader;
use crate::pipeline::{ArchiveArtifactFetcher, HttpDiscovery, IngestPipeline, RunSummary};
use crate::registry::JobRegistry;
use crate::schema::DestinationSchema;

pub const JOB_NAME: &str = "enrolled";

/// Source header names as published by the ministry, mapped to the
/// destination table's column names. Columns that keep their name are listed
/// anyway so startup validation covers the whole expected header.
const COLUMN_RENAMES: &[(&str, &str)] = &[
    ("cat_periodo", "periodo"),
    ("id", "id_matricula"),
    ("codigo_unico", "codigo_unico"),
    ("mrun", "mrun"),
    ("gen_alu", "gen_alu"),
    ("fec_nac_alu", "fec_nac_alumno"),
    ("rango_edad", "rango_edad"),
    ("anio_ing_carr_ori", "anio_ing_carr_ori"),
    ("sem_ing_carr_ori", "sem_ing_carr_ori"),
    ("anio_ing_carr_act", "anio_ing_carr_act"),
    ("sem_ing_carr_act", "sem_ing_carr_act"),
    ("tipo_inst_1", "tipo_instituto"),
    ("tipo_inst_2", "tipo_inst_2"),
    ("tipo_inst_3", "tipo_inst_3"),
    ("cod_inst", "cod_institucion"),
    ("nomb_inst", "institución"),
    ("cod_sede", "cod_sede"),
    ("nomb_sede", "nombre_sede"),
    ("cod_carrera", "cod_carrera"),
    ("nomb_carrera", "carrera"),
    ("modalidad", "modalidad"),
    ("jornada", "jornada"),
    ("version", "version"),
    ("tipo_plan_carr", "tipo_plan_carr"),
    ("dur_estudio_carr", "dur_egreso_carrera"),
    ("dur_proceso_tit", "dur_titulacion"),
    ("dur_total_carr", "dur_carrera"),
    ("region_sede", "region_sede"),
    ("provincia_sede", "provincia_sede"),
    ("comuna_sede", "comuna_sede"),
    ("nivel_global", "grado_academico"),
    ("nivel_carrera_1", "nivel_carrera_det"),
    ("nivel_carrera_2", "nivel_carrera"),
    ("requisito_ingreso", "requisito_ingreso"),
    ("vigencia_carrera", "vigencia_carrera"),
    ("formato_valores", "formato_valores"),
    ("valor_matricula", "valor_matricula"),
    ("valor_arancel", "valor_mensualidad"),
    ("codigo_demre", "codigo_demre"),
    ("area_conocimiento", "area_conocimiento"),
    ("cine_f_97_area", "area_carrera"),
    ("cine_f_97_subarea", "subarea_carrera"),
    ("area_carrera_generica", "area_carrera_generica"),
    ("cine_f_13_area", "area_profesion"),
    ("cine_f_13_subarea", "subarea_carrera_2"),
    ("acreditada_carr", "acreditación_carrera"),
    ("acreditada_inst", "acreditación_institucion"),
    ("acre_inst_desde_hasta", "acre_inst_desde_hasta"),
    ("acre_inst_anio", "año_acreditacion"),
    ("costo_proceso_titulacion", "costo_p_titulacion"),
    ("costo_obtencion_titulo_diploma", "costo_diploma"),
    ("forma_ingreso", "forma_ingreso"),
];

pub fn column_mapping() -> ColumnMapping {
    ColumnMapping::new(COLUMN_RENAMES.iter().copied())
}

pub async fn run(config: &Config, num_files: usize) -> anyhow::Result<RunSummary> {
    let registry = JobRegistry::load(&config.jobs_file)?;
    let spec = registry.job(JOB_NAME)?;
    let pool = config.connect().await?;
    let schema = DestinationSchema::fetch(&pool, spec.destination_table()?).await?;

    let http = Arc::new(HttpFetcher::new(config.http_config())?);
    let discovery = HttpDiscovery::new(
        http.clone(),
        spec.index_url()?,
        spec.archive_extension.clone(),
        spec.year_policy.unwrap_or_default(),
    );
    let fetcher = ArchiveArtifactFetcher::new(
        http,
        ArchiveExtractor::new(&config.unrar_path),
        config.work_dir.clone(),
        spec.table_extension.clone(),
    );

    let pipeline = IngestPipeline::new(
        JOB_NAME,
        schema,
        Box::new(discovery),
        Box::new(fetcher),
        Box::new(SqlLedger::new(pool.clone())),
        Box::new(SqlLoader::new(pool)),
    )
    .with_mapping(column_mapping())
    .with_table_config(super::reader_config(spec))
    .with_metadata_columns(spec.metadata_columns.clone().unwrap_or_default());

    pipeline.run(num_files).await
}
