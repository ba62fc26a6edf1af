//! Shading dispatch tables.
//!
//! Material and light records carry a small integer discriminant instead of
//! branching on their type inside the compute shader. The host builds one
//! fixed-size table per operation (sample / eval / pdf for BRDFs, sample for
//! light geometry), slot index equal to the discriminant, and uploads the
//! tables once per scene. Reordering the variants is a breaking change for
//! every record already serialized with the old discriminants.

/// BRDF variants, in upload order. The integer values are the `brdf` field
/// of the scene file and the `brdf` word of `buffers::MaterialRecord`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrdfKind {
    Disney = 0,
    Glass = 1,
}

pub const BRDF_KIND_COUNT: usize = 2;

impl BrdfKind {
    pub fn from_index(index: i64) -> Option<BrdfKind> {
        match index {
            0 => Some(BrdfKind::Disney),
            1 => Some(BrdfKind::Glass),
            _ => None,
        }
    }

    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Light geometry variants, same contract as `BrdfKind` for the `type`
/// field of `light` blocks.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Sphere = 0,
    Quad = 1,
}

pub const LIGHT_KIND_COUNT: usize = 2;

impl LightKind {
    pub fn from_index(index: i64) -> Option<LightKind> {
        match index {
            0 => Some(LightKind::Sphere),
            1 => Some(LightKind::Quad),
            _ => None,
        }
    }

    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Opaque handle to one shader routine, the value the compute shader
/// switches on exactly once per dispatch-table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderFn(pub u32);

/// Hands out `ShaderFn` handles for named routines in the compute shader.
/// Registering the same entry point twice returns the same handle.
#[derive(Debug, Default)]
pub struct ShaderLibrary {
    entry_points: Vec<&'static str>,
}

impl ShaderLibrary {
    pub fn register(&mut self, entry_point: &'static str) -> ShaderFn {
        if let Some(found) = self.entry_points.iter().position(|e| *e == entry_point) {
            return ShaderFn(found as u32);
        }
        self.entry_points.push(entry_point);
        ShaderFn(self.entry_points.len() as u32 - 1)
    }

    pub fn entry_points(&self) -> &[&'static str] {
        &self.entry_points
    }
}

/// The four tables read by the shader. Built once after the scene loads,
/// immutable for the lifetime of the render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTables {
    pub brdf_sample: [ShaderFn; BRDF_KIND_COUNT],
    pub brdf_eval: [ShaderFn; BRDF_KIND_COUNT],
    pub brdf_pdf: [ShaderFn; BRDF_KIND_COUNT],
    pub light_sample: [ShaderFn; LIGHT_KIND_COUNT],
}

impl DispatchTables {
    pub fn build(library: &mut ShaderLibrary) -> DispatchTables {
        // slot order: BrdfKind::Disney, BrdfKind::Glass
        DispatchTables {
            brdf_sample: [
                library.register("disney_sample"),
                library.register("glass_sample"),
            ],
            brdf_eval: [
                library.register("disney_eval"),
                library.register("glass_eval"),
            ],
            brdf_pdf: [
                library.register("disney_pdf"),
                library.register("glass_pdf"),
            ],
            // slot order: LightKind::Sphere, LightKind::Quad
            light_sample: [
                library.register("sphere_light_sample"),
                library.register("quad_light_sample"),
            ],
        }
    }

    /// Flattens the tables into the word layout the shader indexes:
    /// sample, eval, pdf, then light sample, each table in variant order.
    pub fn words(&self) -> Vec<u32> {
        self.brdf_sample
            .iter()
            .chain(self.brdf_eval.iter())
            .chain(self.brdf_pdf.iter())
            .chain(self.light_sample.iter())
            .map(|f| f.0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_reuses_handles_for_known_entry_points() {
        let mut library = ShaderLibrary::default();
        let a = library.register("disney_sample");
        let b = library.register("glass_sample");
        let again = library.register("disney_sample");

        assert_ne!(a, b);
        assert_eq!(a, again);
        assert_eq!(library.entry_points().len(), 2);
    }

    #[test]
    fn every_variant_has_exactly_one_slot() {
        let mut library = ShaderLibrary::default();
        let tables = DispatchTables::build(&mut library);

        for table in [tables.brdf_sample, tables.brdf_eval, tables.brdf_pdf] {
            assert_eq!(table.len(), BRDF_KIND_COUNT);
            assert_ne!(table[0], table[1]);
        }
        assert_eq!(tables.light_sample.len(), LIGHT_KIND_COUNT);
        assert_ne!(tables.light_sample[0], tables.light_sample[1]);

        // 3 brdf operations + light sampling, no routine registered twice
        assert_eq!(
            library.entry_points().len(),
            3 * BRDF_KIND_COUNT + LIGHT_KIND_COUNT
        );
    }

    #[test]
    fn slot_index_matches_declared_discriminant() {
        let mut library = ShaderLibrary::default();
        let tables = DispatchTables::build(&mut library);

        let disney = tables.brdf_sample[BrdfKind::Disney.index() as usize];
        let glass = tables.brdf_sample[BrdfKind::Glass.index() as usize];
        assert_eq!(disney, ShaderFn(0));
        assert_ne!(disney, glass);

        let sphere = tables.light_sample[LightKind::Sphere.index() as usize];
        let quad = tables.light_sample[LightKind::Quad.index() as usize];
        assert_ne!(sphere, quad);
    }

    #[test]
    fn discriminants_are_stable() {
        assert_eq!(BrdfKind::Disney.index(), 0);
        assert_eq!(BrdfKind::Glass.index(), 1);
        assert_eq!(LightKind::Sphere.index(), 0);
        assert_eq!(LightKind::Quad.index(), 1);

        assert_eq!(BrdfKind::from_index(1), Some(BrdfKind::Glass));
        assert_eq!(BrdfKind::from_index(2), None);
        assert_eq!(LightKind::from_index(1), Some(LightKind::Quad));
        assert_eq!(LightKind::from_index(-1), None);
    }

    #[test]
    fn word_layout_is_tables_in_declaration_order() {
        let mut library = ShaderLibrary::default();
        let tables = DispatchTables::build(&mut library);
        let words = tables.words();

        assert_eq!(words.len(), 3 * BRDF_KIND_COUNT + LIGHT_KIND_COUNT);
        assert_eq!(words[0], tables.brdf_sample[0].0);
        assert_eq!(words[2], tables.brdf_eval[0].0);
        assert_eq!(words[4], tables.brdf_pdf[0].0);
        assert_eq!(words[6], tables.light_sample[0].0);
    }
}
