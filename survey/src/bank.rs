use std::{
    collections::{BTreeMap, HashMap},
    fs::create_dir_all,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{anyhow, Result};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::{params::pad2, random::Rng};

pub const PART2_LURE_SEED: u32 = 2026;

pub const LURES_PER_QUESTION: usize = 2;

const OPTION_LABELS: [&str; 4] = ["A", "B", "C", "D"];

const GENERATION_PREFIX: &'static str = "Generation_";

const TIMESTAMP_SUFFIX_REGEX: &'static str = r"_\d{8}_\d{6}$";

const GENERATION_COLUMN_REGEX: &'static str = r"^Generation_(\d+)$";

/// Model result CSVs are named like `qwq_results_20250101_120000.csv` and
/// keep each model output in a `Generation_N` column.
pub struct ModelCsvParser {
    timestamp_suffix: Regex,
    generation_column: Regex,
}

impl ModelCsvParser {
    pub fn new() -> Self {
        Self {
            timestamp_suffix: Regex::new(TIMESTAMP_SUFFIX_REGEX).unwrap(),
            generation_column: Regex::new(GENERATION_COLUMN_REGEX).unwrap(),
        }
    }

    /// Turns `qwq_results_20250101_120000.csv` into `qwq`.
    pub fn extract_model_name<T: AsRef<str>>(&self, filename: T) -> String {
        let name = filename.as_ref().replace(".csv", "");
        self.timestamp_suffix
            .replace(&name, "")
            .replace("_results", "")
            .replace("_extracted", "")
    }

    /// Returns the `Generation_N` columns ordered by N. Anything with a
    /// non-numeric suffix sorts last.
    pub fn find_generation_columns<T: AsRef<str>>(&self, fieldnames: &[T]) -> Vec<String> {
        let mut columns: Vec<String> = fieldnames
            .iter()
            .map(|name| name.as_ref())
            .filter(|name| name.starts_with(GENERATION_PREFIX))
            .map(|name| name.to_owned())
            .collect();
        columns.sort_by_key(|name| match self.generation_column.captures(name) {
            Some(caps) => caps[1].parse::<u64>().unwrap_or(u64::MAX),
            None => u64::MAX,
        });
        columns
    }
}

pub struct ModelTable {
    pub model_name: String,
    pub source_path: PathBuf,
    pub rows: Vec<HashMap<String, String>>,
    pub generation_cols: Vec<String>,
}

fn read_csv_rows(path: &Path) -> Result<(Vec<String>, Vec<HashMap<String, String>>)> {
    // Short rows get empty cells instead of failing the whole file.
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let fieldnames: Vec<String> = rdr.headers()?.iter().map(|h| h.to_owned()).collect();
    if fieldnames.is_empty() {
        return Err(anyhow!("Missing header: {}", path.display()));
    }
    let mut rows = vec![];
    for result in rdr.records() {
        let record = result?;
        let mut row = HashMap::new();
        for (i, name) in fieldnames.iter().enumerate() {
            row.insert(name.clone(), record.get(i).unwrap_or("").to_owned());
        }
        rows.push(row);
    }
    Ok((fieldnames, rows))
}

pub fn load_models<P: AsRef<Path>>(results_dir: P) -> Result<BTreeMap<String, ModelTable>> {
    let results_dir = results_dir.as_ref();
    let mut csv_files = vec![];
    for entry_result in std::fs::read_dir(results_dir)? {
        let path = entry_result?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "csv") {
            csv_files.push(path);
        }
    }
    if csv_files.is_empty() {
        return Err(anyhow!(
            "No CSV files found under: {}",
            results_dir.display()
        ));
    }
    csv_files.sort();
    let parser = ModelCsvParser::new();
    let mut models = BTreeMap::new();
    for path in csv_files {
        let (fieldnames, rows) = read_csv_rows(&path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let model_name = parser.extract_model_name(&filename);
        models.insert(
            model_name.clone(),
            ModelTable {
                model_name,
                source_path: path,
                rows,
                generation_cols: parser.find_generation_columns(&fieldnames),
            },
        );
    }
    Ok(models)
}

/// Shuffle the option labels for a question and take the first `count` of
/// them as the ones to swap for lures.
pub fn pick_lure_labels<'a>(
    seed: u32,
    question_id: u32,
    labels: &[&'a str],
    count: usize,
) -> Vec<&'a str> {
    let mut shuffled = labels.to_vec();
    Rng::from_key(format!("{seed}|{question_id}|labels")).shuffle(&mut shuffled);
    shuffled.truncate(count);
    shuffled
}

/// Pick another generation from the same model row to stand in for
/// `old_text`. If there's nothing usable, `old_text` is kept.
pub fn choose_lure<T: AsRef<str>>(
    model_row: &HashMap<String, String>,
    generation_cols: &[T],
    source_col: &str,
    old_text: &str,
    seed_key: &str,
) -> String {
    let candidates: Vec<&str> = generation_cols
        .iter()
        .map(|col| col.as_ref())
        .filter(|col| *col != source_col)
        .filter_map(|col| model_row.get(col).map(|text| text.trim()))
        .filter(|text| !text.is_empty() && *text != old_text)
        .collect();
    if candidates.is_empty() {
        return old_text.to_owned();
    }
    let index = (Rng::from_key(seed_key).draw() * candidates.len() as f64).floor() as usize;
    candidates[index.min(candidates.len() - 1)].to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageBRecord {
    pub block_id: u32,
    pub question_id: u32,
    pub scenario_id: usize,
    pub brand: String,
    pub persona: String,

    #[serde(rename = "option_A_model")]
    pub option_a_model: String,
    #[serde(rename = "option_A_source_col")]
    pub option_a_source_col: String,
    #[serde(rename = "option_A_slogan")]
    pub option_a_slogan: String,

    #[serde(rename = "option_B_model")]
    pub option_b_model: String,
    #[serde(rename = "option_B_source_col")]
    pub option_b_source_col: String,
    #[serde(rename = "option_B_slogan")]
    pub option_b_slogan: String,

    #[serde(rename = "option_C_model")]
    pub option_c_model: String,
    #[serde(rename = "option_C_source_col")]
    pub option_c_source_col: String,
    #[serde(rename = "option_C_slogan")]
    pub option_c_slogan: String,

    #[serde(rename = "option_D_model")]
    pub option_d_model: String,
    #[serde(rename = "option_D_source_col")]
    pub option_d_source_col: String,
    #[serde(rename = "option_D_slogan")]
    pub option_d_slogan: String,
}

impl StageBRecord {
    /// The slogan exactly as it appears in the stage B CSV.
    fn slogan(&self, label: &str) -> Option<&str> {
        let slogan = match label {
            "A" => &self.option_a_slogan,
            "B" => &self.option_b_slogan,
            "C" => &self.option_c_slogan,
            "D" => &self.option_d_slogan,
            _ => return None,
        };
        Some(slogan.as_str())
    }

    /// Returns (model, source column, trimmed slogan) for an option label.
    fn option(&self, label: &str) -> Option<(&str, &str, &str)> {
        let slogan = self.slogan(label)?.trim();
        let (model, source_col) = match label {
            "A" => (&self.option_a_model, &self.option_a_source_col),
            "B" => (&self.option_b_model, &self.option_b_source_col),
            "C" => (&self.option_c_model, &self.option_c_source_col),
            _ => (&self.option_d_model, &self.option_d_source_col),
        };
        Some((model.as_str(), source_col.as_str(), slogan))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question_id: u32,
    pub scenario_id: usize,
    pub brand: String,
    pub persona: String,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_id: u32,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part2Metadata {
    pub created_at_unix: u64,
    pub seed: u32,
    pub lures_per_question: usize,
    pub stage_b_bank_blocks_csv: String,
    pub results_clean_dir: String,
    pub model_files: Vec<String>,
    pub num_blocks: usize,
    pub num_questions: usize,
}

#[derive(Debug)]
pub struct Part2Bank {
    pub blocks: Vec<Block>,
    pub metadata: Part2Metadata,
}

fn build_question(
    record: StageBRecord,
    models: &BTreeMap<String, ModelTable>,
    seed: u32,
) -> Result<Question> {
    let qid = record.question_id;
    let lure_labels = pick_lure_labels(seed, qid, &OPTION_LABELS, LURES_PER_QUESTION);
    let mut options = vec![];
    for label in OPTION_LABELS {
        let Some((model_name, source_col, old_text)) = record.option(label) else {
            return Err(anyhow!("Unknown option label: {label}"));
        };
        let Some(model) = models.get(model_name) else {
            return Err(anyhow!("Missing model table for: {model_name}"));
        };
        let Some(model_row) = model.rows.get(record.scenario_id) else {
            return Err(anyhow!(
                "Scenario out of range: {} for {model_name}",
                record.scenario_id
            ));
        };
        let expected_old = model_row.get(source_col).map_or("", |text| text.trim());
        if !expected_old.is_empty() && expected_old != old_text {
            return Err(anyhow!(
                "Slogan mismatch qid={qid} label={label} model={model_name}: \
                 stage_b='{old_text}' results_clean='{expected_old}'"
            ));
        }
        let text = if lure_labels.contains(&label) {
            choose_lure(
                model_row,
                &model.generation_cols,
                source_col,
                old_text,
                &format!("{seed}|{qid}|{label}|lure"),
            )
        } else {
            old_text.to_owned()
        };
        options.push(QuestionOption {
            label: label.to_owned(),
            text,
        });
    }
    Ok(Question {
        question_id: qid,
        scenario_id: record.scenario_id,
        brand: record.brand,
        persona: record.persona,
        options,
    })
}

fn read_stage_b_records(stage_b_csv: &Path) -> Result<Vec<StageBRecord>> {
    let mut rdr = csv::Reader::from_path(stage_b_csv)?;
    let mut records = vec![];
    for result in rdr.deserialize() {
        let record: StageBRecord = result?;
        records.push(record);
    }
    Ok(records)
}

/// Build the Part 2 question blocks, swapping some options in every
/// question for lures taken from other generations of the same model.
///
/// Lure decisions come from [`Rng`] keyed by FNV-1a, the same generator the
/// survey page uses. Older Part 2 banks were built with a different
/// generator, so their lure choices can't be regenerated with this; rebuild
/// and redeploy every block together rather than mixing the two.
pub fn build_part2_blocks<P: AsRef<Path>, Q: AsRef<Path>>(
    stage_b_csv: P,
    results_dir: Q,
    seed: u32,
) -> Result<Part2Bank> {
    let stage_b_csv = stage_b_csv.as_ref();
    let results_dir = results_dir.as_ref();
    let models = load_models(results_dir)?;

    let mut blocks: BTreeMap<u32, Vec<Question>> = BTreeMap::new();
    for record in read_stage_b_records(stage_b_csv)? {
        let block_id = record.block_id;
        let question = build_question(record, &models, seed)?;
        blocks.entry(block_id).or_default().push(question);
    }

    let blocks: Vec<Block> = blocks
        .into_iter()
        .map(|(block_id, mut questions)| {
            questions.sort_by_key(|question| question.question_id);
            Block {
                block_id,
                questions,
            }
        })
        .collect();

    let metadata = Part2Metadata {
        created_at_unix: SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs(),
        seed,
        lures_per_question: LURES_PER_QUESTION,
        stage_b_bank_blocks_csv: stage_b_csv.display().to_string(),
        results_clean_dir: results_dir.display().to_string(),
        model_files: models
            .values()
            .filter_map(|model| model.source_path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect(),
        num_blocks: blocks.len(),
        num_questions: blocks.iter().map(|block| block.questions.len()).sum(),
    };

    Ok(Part2Bank { blocks, metadata })
}

fn write_pretty_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut pretty_printed = serde_json::to_string_pretty(value)?;
    pretty_printed.push('\n');
    std::fs::write(path, pretty_printed)?;
    Ok(())
}

impl Part2Bank {
    pub fn block_filename(block_id: u32) -> String {
        format!("block_{}.json", pad2(block_id))
    }

    pub fn write<P: AsRef<Path>, Q: AsRef<Path>>(&self, out_dir: P, metadata_path: Q) -> Result<()> {
        let out_dir = out_dir.as_ref();
        create_dir_all(out_dir)?;
        for block in &self.blocks {
            write_pretty_json(&out_dir.join(Self::block_filename(block.block_id)), block)?;
        }
        println!("Wrote {} (n={})", out_dir.display(), self.blocks.len());
        write_pretty_json(metadata_path.as_ref(), &self.metadata)?;
        println!("Wrote {}", metadata_path.as_ref().display());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomQuestion {
    pub question_id: u32,
    pub display_id: usize,
    pub source_block_id: u32,
    pub scenario_id: usize,
    pub brand: String,
    pub persona: String,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomBlockFile {
    pub block_id: u32,
    pub questions: Vec<CustomQuestion>,
}

/// A hand-picked block, with a Part 1 version built from the original stage
/// B slogans and a Part 2 version reusing the already built lure questions.
#[derive(Debug)]
pub struct CustomBlock {
    pub part1: CustomBlockFile,
    pub part2: CustomBlockFile,
}

/// Collect every question from the `block_*.json` files in `part2_dir`.
pub fn load_part2_questions<P: AsRef<Path>>(part2_dir: P) -> Result<HashMap<u32, Question>> {
    let mut block_files = vec![];
    for entry_result in std::fs::read_dir(part2_dir.as_ref())? {
        let path = entry_result?.path();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.is_file() && filename.starts_with("block_") && filename.ends_with(".json") {
            block_files.push(path);
        }
    }
    block_files.sort();
    let mut questions = HashMap::new();
    for path in block_files {
        let block: Block = match serde_json::from_str(&std::fs::read_to_string(&path)?) {
            Ok(block) => block,
            Err(err) => return Err(anyhow!("Failed to load {}: {}", path.display(), err)),
        };
        for question in block.questions {
            questions.insert(question.question_id, question);
        }
    }
    Ok(questions)
}

/// Build a block out of `question_ids`, in that order, for both parts of the
/// survey. Display IDs count up from 1.
pub fn build_custom_block<P: AsRef<Path>, Q: AsRef<Path>>(
    stage_b_csv: P,
    part2_dir: Q,
    question_ids: &[u32],
    block_id: u32,
) -> Result<CustomBlock> {
    let stage_rows: HashMap<u32, StageBRecord> = read_stage_b_records(stage_b_csv.as_ref())?
        .into_iter()
        .map(|record| (record.question_id, record))
        .collect();
    let part2_questions = load_part2_questions(part2_dir)?;

    let missing: Vec<u32> = question_ids
        .iter()
        .copied()
        .filter(|qid| !stage_rows.contains_key(qid))
        .collect();
    if !missing.is_empty() {
        return Err(anyhow!("Missing question_id(s) in stage B CSV: {missing:?}"));
    }
    let missing_part2: Vec<u32> = question_ids
        .iter()
        .copied()
        .filter(|qid| !part2_questions.contains_key(qid))
        .collect();
    if !missing_part2.is_empty() {
        return Err(anyhow!(
            "Missing question_id(s) in Part 2 blocks: {missing_part2:?}"
        ));
    }

    let mut part1 = vec![];
    let mut part2 = vec![];
    for (i, qid) in question_ids.iter().enumerate() {
        let display_id = i + 1;
        let row = &stage_rows[qid];
        let options = OPTION_LABELS
            .iter()
            .map(|label| QuestionOption {
                label: label.to_string(),
                text: row.slogan(label).unwrap_or_default().to_owned(),
            })
            .collect();
        part1.push(CustomQuestion {
            question_id: *qid,
            display_id,
            source_block_id: row.block_id,
            scenario_id: row.scenario_id,
            brand: row.brand.clone(),
            persona: row.persona.clone(),
            options,
        });

        let question = part2_questions[qid].clone();
        part2.push(CustomQuestion {
            question_id: question.question_id,
            display_id,
            source_block_id: row.block_id,
            scenario_id: question.scenario_id,
            brand: question.brand,
            persona: question.persona,
            options: question.options,
        });
    }

    Ok(CustomBlock {
        part1: CustomBlockFile {
            block_id,
            questions: part1,
        },
        part2: CustomBlockFile {
            block_id,
            questions: part2,
        },
    })
}

impl CustomBlock {
    pub fn write<P: AsRef<Path>, Q: AsRef<Path>>(&self, blocks_dir: P, part2_dir: Q) -> Result<()> {
        for (dir, file) in [
            (blocks_dir.as_ref(), &self.part1),
            (part2_dir.as_ref(), &self.part2),
        ] {
            create_dir_all(dir)?;
            let path = dir.join(Part2Bank::block_filename(file.block_id));
            write_pretty_json(&path, file)?;
            println!(
                "Wrote {} with {} questions",
                path.display(),
                file.questions.len()
            );
        }
        Ok(())
    }
}
