// Pipeline processing: validation, normalization, enrichment and the join

pub mod enrich;
pub mod join;
pub mod normalize;
pub mod outliers;
pub mod quality_gate;
pub mod summary;
