//! Tag registry and query evaluation.
//!
//! A tag is a named boolean expression registered in one of three
//! contexts: `gene`, `transcript` or `reference`. Expressions reference
//! properties of the evaluated object and other tags; transcript
//! expressions additionally see gene-context tags of the owning gene.
//! Registration parses, validates and cycle-checks the expression, so
//! evaluation of gene and transcript queries is infallible. Unknown
//! identifiers are a hard error, never a silent `false`.

use hashbrown::{HashMap, HashSet};
use iso_model::{Gene, RefTranscript};
use thiserror::Error;

use crate::parser::{parse, CmpOp, Expr, Literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterContext {
    Gene,
    Transcript,
    Reference,
}

impl FilterContext {
    /// Contexts whose tags are visible from `self`, nearest first.
    fn scope(&self) -> &'static [FilterContext] {
        match self {
            FilterContext::Gene => &[FilterContext::Gene],
            FilterContext::Transcript => &[FilterContext::Transcript, FilterContext::Gene],
            FilterContext::Reference => &[FilterContext::Reference],
        }
    }
}

impl std::fmt::Display for FilterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FilterContext::Gene => write!(f, "gene"),
            FilterContext::Transcript => write!(f, "transcript"),
            FilterContext::Reference => write!(f, "reference"),
        }
    }
}

impl std::str::FromStr for FilterContext {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gene" => Ok(FilterContext::Gene),
            "transcript" => Ok(FilterContext::Transcript),
            "reference" => Ok(FilterContext::Reference),
            other => Err(FilterError::UnknownContext(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown filter context: {0}")]
    UnknownContext(String),
    #[error("unknown identifier '{name}' in {context} context")]
    UnknownIdentifier {
        name: String,
        context: FilterContext,
    },
    #[error("tag '{0}' would reference itself")]
    CyclicTag(String),
}

/// A property value at evaluation time. `Null` is a known property that is
/// absent on this object: false under every comparison and as a truth
/// test, never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

impl PropValue {
    fn truthy(&self) -> bool {
        match self {
            PropValue::Bool(b) => *b,
            PropValue::Int(i) => *i != 0,
            PropValue::Float(f) => *f != 0.0,
            PropValue::Str(s) => !s.is_empty(),
            PropValue::Null => false,
        }
    }

    fn compare(&self, op: CmpOp, literal: &Literal) -> bool {
        use std::cmp::Ordering;

        let ordering = match (self, literal) {
            (PropValue::Null, _) => return false,
            (PropValue::Int(a), Literal::Int(b)) => a.cmp(b),
            (PropValue::Int(a), Literal::Float(b)) => {
                match (*a as f64).partial_cmp(b) {
                    Some(ord) => ord,
                    None => return false,
                }
            }
            (PropValue::Float(a), Literal::Int(b)) => {
                match a.partial_cmp(&(*b as f64)) {
                    Some(ord) => ord,
                    None => return false,
                }
            }
            (PropValue::Float(a), Literal::Float(b)) => match a.partial_cmp(b) {
                Some(ord) => ord,
                None => return false,
            },
            (PropValue::Str(a), Literal::Str(b)) => a.as_str().cmp(b.as_str()),
            (PropValue::Bool(a), Literal::Bool(b)) => {
                return match op {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                    _ => false,
                };
            }
            _ => return matches!(op, CmpOp::Ne),
        };

        match op {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }
}

const GENE_PROPS: &[&str] = &[
    "id",
    "name",
    "chrom",
    "strand",
    "start",
    "end",
    "is_annotated",
    "is_expressed",
    "is_chimeric",
    "n_transcripts",
    "n_ref_transcripts",
    "total_coverage",
];

const TRANSCRIPT_PROPS: &[&str] = &[
    "chrom",
    "strand",
    "novelty",
    "subcategory",
    "exon_count",
    "length",
    "total_coverage",
    "downstream_a_content",
    "is_chimeric",
    "gene_id",
    "gene_name",
    "gene_is_annotated",
    "gene_total_coverage",
];

const REF_PROPS: &[&str] = &[
    "transcript_id",
    "transcript_name",
    "transcript_type",
    "support_level",
    "exon_count",
    "length",
    "is_coding",
];

fn is_prop(context: FilterContext, name: &str) -> bool {
    match context {
        FilterContext::Gene => GENE_PROPS.contains(&name),
        FilterContext::Transcript => TRANSCRIPT_PROPS.contains(&name),
        FilterContext::Reference => REF_PROPS.contains(&name),
    }
}

#[derive(Debug, Clone)]
struct TagDef {
    expr: Expr,
    source: String,
}

/// The session's named tags, keyed by context.
#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    tags: HashMap<(FilterContext, String), TagDef>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the stock tags.
    pub fn with_defaults() -> Self {
        let internal_priming = format!(
            "downstream_a_content > {}",
            config::INTERNAL_PRIMING_THRESHOLD
        );
        let defaults: &[(&str, &str, FilterContext)] = &[
            ("NOVEL_GENE", "not is_annotated", FilterContext::Gene),
            ("EXPRESSED", "total_coverage > 0", FilterContext::Gene),
            ("CHIMERIC_GENE", "is_chimeric", FilterContext::Gene),
            ("FSM", "novelty == 'FSM'", FilterContext::Transcript),
            (
                "NOVEL_TRANSCRIPT",
                "novelty != 'FSM'",
                FilterContext::Transcript,
            ),
            ("UNSPLICED", "exon_count == 1", FilterContext::Transcript),
            ("MULTIEXON", "exon_count > 1", FilterContext::Transcript),
            (
                "HIGH_COVER",
                "total_coverage >= 7",
                FilterContext::Transcript,
            ),
            ("CHIMERIC", "is_chimeric", FilterContext::Transcript),
            (
                "HIGH_SUPPORT",
                "support_level == '1'",
                FilterContext::Reference,
            ),
            (
                "PROTEIN_CODING",
                "transcript_type == 'protein_coding'",
                FilterContext::Reference,
            ),
        ];

        let mut registry = Self::new();
        for &(name, source, context) in defaults {
            registry
                .add_filter(name, source, context)
                .expect("stock tags are valid");
        }
        registry
            .add_filter("INTERNAL_PRIMING", &internal_priming, FilterContext::Transcript)
            .expect("stock tags are valid");

        registry
    }

    pub fn tag_names(&self, context: FilterContext) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tags
            .keys()
            .filter(|(ctx, _)| *ctx == context)
            .map(|(_, name)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn tag_source(&self, context: FilterContext, name: &str) -> Option<&str> {
        self.lookup(context, name).map(|(_, def)| def.source.as_str())
    }

    /// Finds a visible tag, nearest context first, and reports the context
    /// it is defined in: that context governs its evaluation.
    fn lookup(&self, context: FilterContext, name: &str) -> Option<(FilterContext, &TagDef)> {
        context
            .scope()
            .iter()
            .find_map(|&ctx| self.tags.get(&(ctx, name.to_string())).map(|def| (ctx, def)))
    }

    /// Registers (or replaces) a named tag. The expression is parsed,
    /// every identifier checked and reference chains walked for cycles
    /// before anything is stored.
    pub fn add_filter(
        &mut self,
        name: &str,
        source: &str,
        context: FilterContext,
    ) -> Result<(), FilterError> {
        let expr = parse(source).map_err(FilterError::Syntax)?;

        self.validate(context, &expr, Some(name))?;
        self.check_cycles(name, &expr, context)?;

        if self
            .tags
            .insert(
                (context, name.to_string()),
                TagDef {
                    expr,
                    source: source.to_string(),
                },
            )
            .is_some()
        {
            log::warn!("tag {} ({} context) redefined", name, context);
        }

        Ok(())
    }

    /// Compiles a one-off query against the current registry.
    pub fn compile(&self, context: FilterContext, source: &str) -> Result<CompiledQuery, FilterError> {
        let expr = parse(source).map_err(FilterError::Syntax)?;
        self.validate(context, &expr, None)?;

        Ok(CompiledQuery { context, expr })
    }

    /// Every identifier must be a property of the context, a visible tag,
    /// or (in the reference context) a dynamic annotation attribute.
    /// `pending` is the name of a tag being registered, visible to itself
    /// only so the cycle check can reject it with the better error.
    fn validate(
        &self,
        context: FilterContext,
        expr: &Expr,
        pending: Option<&str>,
    ) -> Result<(), FilterError> {
        for ident in expr.idents() {
            if is_prop(context, ident)
                || self.lookup(context, ident).is_some()
                || pending == Some(ident)
                || context == FilterContext::Reference
            {
                continue;
            }
            return Err(FilterError::UnknownIdentifier {
                name: ident.to_string(),
                context,
            });
        }

        Ok(())
    }

    /// Walks tag references from the candidate; any path back to a tag on
    /// the walk stack is a cycle and the registration is rejected whole.
    fn check_cycles(
        &self,
        name: &str,
        expr: &Expr,
        context: FilterContext,
    ) -> Result<(), FilterError> {
        let mut stack: Vec<&str> = vec![name];
        self.walk(expr, context, &mut stack)
            .map_err(FilterError::CyclicTag)
    }

    fn walk<'a>(
        &'a self,
        expr: &'a Expr,
        context: FilterContext,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), String> {
        for ident in expr.idents() {
            if is_prop(context, ident) {
                continue;
            }
            if stack.contains(&ident) {
                return Err(ident.to_string());
            }
            if let Some((ctx, def)) = self.lookup(context, ident) {
                stack.push(ident);
                self.walk(&def.expr, ctx, stack)?;
                stack.pop();
            }
        }

        Ok(())
    }
}

/// A parsed, validated query bound to its context.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    context: FilterContext,
    expr: Expr,
}

#[derive(Clone, Copy)]
enum Target<'a> {
    Gene(&'a Gene),
    Transcript(&'a Gene, usize),
    Reference(&'a RefTranscript),
}

impl<'a> Target<'a> {
    /// The view of this object a tag defined in `context` evaluates
    /// against: a gene tag referenced from a transcript binds to the
    /// owning gene.
    fn narrow(&self, context: FilterContext) -> Target<'a> {
        match (self, context) {
            (Target::Transcript(gene, _), FilterContext::Gene) => Target::Gene(gene),
            _ => *self,
        }
    }
}

impl CompiledQuery {
    pub fn context(&self) -> FilterContext {
        self.context
    }

    pub fn matches_gene(&self, registry: &FilterRegistry, gene: &Gene) -> bool {
        debug_assert_eq!(self.context, FilterContext::Gene);
        Evaluator::new(registry).eval(&self.expr, self.context, &Target::Gene(gene))
    }

    pub fn matches_transcript(&self, registry: &FilterRegistry, gene: &Gene, idx: usize) -> bool {
        debug_assert_eq!(self.context, FilterContext::Transcript);
        Evaluator::new(registry).eval(&self.expr, self.context, &Target::Transcript(gene, idx))
    }

    pub fn matches_reference(&self, registry: &FilterRegistry, record: &RefTranscript) -> bool {
        debug_assert_eq!(self.context, FilterContext::Reference);
        Evaluator::new(registry).eval(&self.expr, self.context, &Target::Reference(record))
    }
}

/// One evaluation pass; tag results are memoized per object.
struct Evaluator<'a> {
    registry: &'a FilterRegistry,
    memo: HashMap<(FilterContext, String), bool>,
    visiting: HashSet<String>,
}

impl<'a> Evaluator<'a> {
    fn new(registry: &'a FilterRegistry) -> Self {
        Self {
            registry,
            memo: HashMap::new(),
            visiting: HashSet::new(),
        }
    }

    fn eval(&mut self, expr: &Expr, context: FilterContext, target: &Target) -> bool {
        match expr {
            Expr::Ident(name) => self.resolve(name, context, target).truthy(),
            Expr::Cmp { ident, op, literal } => {
                self.resolve(ident, context, target).compare(*op, literal)
            }
            Expr::Not(inner) => !self.eval(inner, context, target),
            Expr::And(a, b) => self.eval(a, context, target) && self.eval(b, context, target),
            Expr::Or(a, b) => self.eval(a, context, target) || self.eval(b, context, target),
        }
    }

    fn resolve(&mut self, name: &str, context: FilterContext, target: &Target) -> PropValue {
        if let Some(value) = prop_value(name, target) {
            return value;
        }

        if let Some((ctx, def)) = self.registry.lookup(context, name) {
            let key = (ctx, name.to_string());
            if let Some(&hit) = self.memo.get(&key) {
                return PropValue::Bool(hit);
            }
            // registration rejects cycles, so a revisit here is a bug
            if !self.visiting.insert(name.to_string()) {
                debug_assert!(false, "tag cycle at evaluation");
                return PropValue::Bool(false);
            }
            let value = self.eval(&def.expr.clone(), ctx, &target.narrow(ctx));
            self.visiting.remove(name);
            self.memo.insert(key, value);
            return PropValue::Bool(value);
        }

        match target {
            // dynamic annotation attributes, absent means Null
            Target::Reference(record) => record
                .attributes
                .get(name)
                .map(|v| PropValue::Str(v.clone()))
                .unwrap_or(PropValue::Null),
            // gene and transcript idents were validated at compile time
            _ => {
                debug_assert!(false, "unvalidated identifier {}", name);
                PropValue::Null
            }
        }
    }
}

fn opt_str(value: &Option<String>) -> PropValue {
    value
        .as_ref()
        .map(|s| PropValue::Str(s.clone()))
        .unwrap_or(PropValue::Null)
}

fn prop_value(name: &str, target: &Target) -> Option<PropValue> {
    let value = match target {
        Target::Gene(gene) => match name {
            "id" => PropValue::Str(gene.id.clone()),
            "name" => opt_str(&gene.name),
            "chrom" => PropValue::Str(gene.chrom.clone()),
            "strand" => PropValue::Str(gene.strand.to_string()),
            "start" => PropValue::Int(gene.start as i64),
            "end" => PropValue::Int(gene.end as i64),
            "is_annotated" => PropValue::Bool(gene.is_annotated()),
            "is_expressed" => PropValue::Bool(gene.is_expressed()),
            "is_chimeric" => PropValue::Bool(gene.is_chimeric()),
            "n_transcripts" => PropValue::Int(gene.n_transcripts() as i64),
            "n_ref_transcripts" => PropValue::Int(gene.n_ref_transcripts() as i64),
            "total_coverage" => PropValue::Int(gene.total_coverage() as i64),
            _ => return None,
        },
        Target::Transcript(gene, idx) => {
            let tx = &gene.transcripts[*idx];
            match name {
                "chrom" => PropValue::Str(gene.chrom.clone()),
                "strand" => PropValue::Str(tx.strand.to_string()),
                "novelty" => PropValue::Str(tx.novelty()),
                "subcategory" => PropValue::Str(tx.subcategory()),
                "exon_count" => PropValue::Int(tx.exon_count() as i64),
                "length" => PropValue::Int(tx.length() as i64),
                "total_coverage" => PropValue::Int(tx.total_coverage() as i64),
                "downstream_a_content" => tx
                    .downstream_a_content
                    .map(|a| PropValue::Float(a as f64))
                    .unwrap_or(PropValue::Null),
                "is_chimeric" => PropValue::Bool(tx.is_chimeric),
                "gene_id" => PropValue::Str(gene.id.clone()),
                "gene_name" => opt_str(&gene.name),
                "gene_is_annotated" => PropValue::Bool(gene.is_annotated()),
                "gene_total_coverage" => PropValue::Int(gene.total_coverage() as i64),
                _ => return None,
            }
        }
        Target::Reference(record) => match name {
            "transcript_id" => PropValue::Str(record.transcript_id.clone()),
            "transcript_name" => opt_str(&record.transcript_name),
            "transcript_type" => opt_str(&record.transcript_type),
            "support_level" => opt_str(&record.support_level),
            "exon_count" => PropValue::Int(record.exon_count() as i64),
            "length" => PropValue::Int(record.length() as i64),
            "is_coding" => PropValue::Bool(record.is_coding()),
            _ => return None,
        },
    };

    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Strand;
    use iso_model::{Annotation, SpliceCategory, Transcript};

    fn gene() -> Gene {
        let mut gene = Gene::new_novel("G1".into(), "chr1", Strand::Forward, 100, 500);
        let mut tx = Transcript::from_chain(vec![(100, 200), (300, 500)], Strand::Forward, 1, 0)
            .expect("valid chain");
        tx.annotation = Some(Annotation::new(SpliceCategory::Fsm).with("FSM", vec![0]));
        for _ in 0..9 {
            tx.observe(0, 100, 500);
        }
        gene.transcripts.push(tx);
        gene.transcripts.push(
            Transcript::from_chain(vec![(100, 400)], Strand::Forward, 1, 0).expect("valid chain"),
        );

        gene
    }

    #[test]
    fn test_stock_tags_evaluate() {
        let registry = FilterRegistry::with_defaults();
        let gene = gene();

        let fsm = registry
            .compile(FilterContext::Transcript, "FSM")
            .expect("known tag");
        assert!(fsm.matches_transcript(&registry, &gene, 0));
        assert!(!fsm.matches_transcript(&registry, &gene, 1));

        let q = registry
            .compile(FilterContext::Transcript, "HIGH_COVER and not UNSPLICED")
            .expect("known tags");
        assert!(q.matches_transcript(&registry, &gene, 0));
        assert!(!q.matches_transcript(&registry, &gene, 1));

        let novel = registry
            .compile(FilterContext::Gene, "NOVEL_GENE and EXPRESSED")
            .expect("known tags");
        assert!(novel.matches_gene(&registry, &gene));
    }

    #[test]
    fn test_unknown_identifier_is_an_error() {
        let registry = FilterRegistry::with_defaults();

        let err = registry
            .compile(FilterContext::Transcript, "novelti == 'FSM'")
            .unwrap_err();
        assert_eq!(
            err,
            FilterError::UnknownIdentifier {
                name: "novelti".into(),
                context: FilterContext::Transcript,
            }
        );

        // gene tags are not visible from the gene's own context twin
        assert!(registry.compile(FilterContext::Gene, "FSM").is_err());
    }

    #[test]
    fn test_tags_reference_tags() {
        let mut registry = FilterRegistry::with_defaults();
        registry
            .add_filter(
                "CONFIDENT",
                "HIGH_COVER and not INTERNAL_PRIMING",
                FilterContext::Transcript,
            )
            .expect("valid");

        let gene = gene();
        let q = registry
            .compile(FilterContext::Transcript, "CONFIDENT")
            .expect("known tag");
        assert!(q.matches_transcript(&registry, &gene, 0));
    }

    #[test]
    fn test_gene_tags_evaluate_from_transcript_context() {
        let registry = FilterRegistry::with_defaults();
        let gene = gene();

        // gene() has no reference transcripts
        let novel = registry
            .compile(FilterContext::Transcript, "NOVEL_GENE")
            .expect("gene tag in scope");
        assert!(novel.matches_transcript(&registry, &gene, 0));

        let mut annotated = self::gene();
        annotated.ref_transcripts.push(
            iso_model::RefTranscript::new("T1", vec![(100, 200), (300, 500)]).expect("valid"),
        );
        assert!(!novel.matches_transcript(&registry, &annotated, 0));

        // EXPRESSED binds to the owning gene's coverage, not the
        // transcript's: transcript 1 carries no reads itself
        let expressed = registry
            .compile(FilterContext::Transcript, "EXPRESSED")
            .expect("gene tag in scope");
        assert_eq!(gene.transcripts[1].total_coverage(), 0);
        assert!(expressed.matches_transcript(&registry, &gene, 1));
    }

    #[test]
    fn test_cycle_rejected_at_registration() {
        let mut registry = FilterRegistry::new();
        registry
            .add_filter("A", "exon_count > 1", FilterContext::Transcript)
            .expect("valid");
        registry
            .add_filter("B", "A and length > 100", FilterContext::Transcript)
            .expect("valid");

        // self reference
        assert_eq!(
            registry.add_filter("C", "C or A", FilterContext::Transcript),
            Err(FilterError::CyclicTag("C".into()))
        );
        // indirect cycle through the redefinition of A
        assert!(matches!(
            registry.add_filter("A", "not B", FilterContext::Transcript),
            Err(FilterError::CyclicTag(_))
        ));
        // the rejected redefinition left the registry untouched
        assert_eq!(
            registry.tag_source(FilterContext::Transcript, "A"),
            Some("exon_count > 1")
        );
    }

    #[test]
    fn test_replacement_keeps_latest() {
        let mut registry = FilterRegistry::new();
        registry
            .add_filter("SHORT", "length < 500", FilterContext::Transcript)
            .expect("valid");
        registry
            .add_filter("SHORT", "length < 300", FilterContext::Transcript)
            .expect("valid");

        let gene = gene();
        let q = registry
            .compile(FilterContext::Transcript, "SHORT")
            .expect("known tag");
        // transcript 0 is 300bp, transcript 1 is 300bp
        assert!(!q.matches_transcript(&registry, &gene, 0));
    }

    #[test]
    fn test_null_is_false_never_an_error() {
        let registry = FilterRegistry::with_defaults();
        let gene = gene();

        // downstream_a_content is unset on both transcripts
        let q = registry
            .compile(FilterContext::Transcript, "INTERNAL_PRIMING")
            .expect("known tag");
        assert!(!q.matches_transcript(&registry, &gene, 0));

        let q = registry
            .compile(FilterContext::Transcript, "downstream_a_content < 0.5")
            .expect("known property");
        assert!(!q.matches_transcript(&registry, &gene, 0));
    }

    #[test]
    fn test_reference_context() {
        let registry = FilterRegistry::with_defaults();
        let mut record =
            iso_model::RefTranscript::new("T1", vec![(100, 200), (300, 400)]).expect("valid");
        record.support_level = Some("1".into());
        record.transcript_type = Some("protein_coding".into());
        record.attributes.insert("source".into(), "HAVANA".into());

        let q = registry
            .compile(
                FilterContext::Reference,
                "HIGH_SUPPORT and PROTEIN_CODING and source == 'HAVANA'",
            )
            .expect("valid");
        assert!(q.matches_reference(&registry, &record));

        // absent dynamic attribute is Null, so the test is simply false
        let q = registry
            .compile(FilterContext::Reference, "ccds_id == 'CCDS1'")
            .expect("valid");
        assert!(!q.matches_reference(&registry, &record));
    }
}
