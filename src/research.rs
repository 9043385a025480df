// 🤖 Research Collaborator - Campaign-aware company intelligence
//
// The LLM is an opaque text-completion service: this module owns prompt
// construction (layered campaign / seller / target / web-result sections)
// and strict parsing of the JSON object in the response. A completion
// that surrounds its JSON with prose is tolerated; one whose JSON does
// not match the expected schema fails with a typed error instead of a
// best-effort partial parse.

use anyhow::{Context, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;
const MAX_SEARCH_QUERIES: usize = 8;

const SYSTEM_PROMPT: &str = "You are a B2B sales intelligence analyst. \
    Always respond with valid JSON matching the requested format.";

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchLevel {
    TamScreening,
    AccountBuilding,
    OpportunityMapping,
    OngoingMonitoring,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignContext {
    pub name: String,
    pub campaign_type: String,

    /// Full markdown context document; when present it supersedes the
    /// structured fields below.
    #[serde(default)]
    pub campaign_context: Option<String>,

    #[serde(default)]
    pub value_proposition: Option<String>,

    #[serde(default)]
    pub key_pain_points: Option<String>,

    #[serde(default)]
    pub regulatory_context: Option<String>,

    #[serde(default)]
    pub signal_triggers: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SellerContext {
    pub company_name: String,

    #[serde(default)]
    pub sales_intelligence_context: Option<String>,

    #[serde(default)]
    pub value_proposition: Option<String>,

    #[serde(default)]
    pub products_services: Option<String>,

    #[serde(default)]
    pub key_differentiators: Option<String>,

    #[serde(default)]
    pub competitive_positioning: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetCompany {
    pub company_name: String,

    #[serde(default)]
    pub website: Option<String>,

    #[serde(default)]
    pub industry: Option<String>,

    #[serde(default)]
    pub vertical: Option<String>,

    #[serde(default)]
    pub employee_count: Option<u32>,

    #[serde(default)]
    pub headquarters: Option<String>,

    #[serde(default)]
    pub company_summary: Option<String>,

    #[serde(default)]
    pub existing_signals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub results: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub level: ResearchLevel,
    pub campaigns: Vec<CampaignContext>,

    #[serde(default)]
    pub seller: Option<SellerContext>,

    #[serde(default)]
    pub target: Option<TargetCompany>,

    #[serde(default)]
    pub search_results: Vec<SearchResult>,
}

// ============================================================================
// TYPED RESULTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedSignal {
    #[serde(rename = "type")]
    pub signal_type: String,
    pub description: String,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub relevance: Option<String>,
}

/// Level 1 output: broad screening of a TAM account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub fit_score: u32,
    pub fit_rationale: String,

    #[serde(default)]
    pub detected_signals: Vec<DetectedSignal>,

    #[serde(default)]
    pub recommended_search_queries: Vec<String>,

    #[serde(default)]
    pub priority_ranking: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompellingEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub description: String,

    #[serde(default)]
    pub urgency: Option<String>,

    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyingSignal {
    #[serde(default)]
    pub id: Option<String>,
    pub signal_type: String,
    pub description: String,

    #[serde(default)]
    pub strength: Option<String>,

    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskItem {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub description: String,

    #[serde(default)]
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PainPointAlignment {
    pub pain_point: String,
    pub evidence: String,

    #[serde(default)]
    pub confidence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeholderTarget {
    pub role: String,
    pub messaging_angle: String,

    #[serde(default)]
    pub priority: Option<String>,
}

/// Level 2 output: the account thesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountThesis {
    pub thesis: String,
    pub summary: String,

    #[serde(default)]
    pub compelling_events: Vec<CompellingEvent>,

    #[serde(default)]
    pub buying_signals: Vec<BuyingSignal>,

    #[serde(default)]
    pub risks: Vec<RiskItem>,

    #[serde(default)]
    pub pain_point_alignment: Vec<PainPointAlignment>,

    #[serde(default)]
    pub stakeholder_targets: Vec<StakeholderTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitespaceOpportunity {
    pub product_service: String,
    pub need_identified: String,

    #[serde(default)]
    pub value_fit: Option<String>,

    #[serde(default)]
    pub competitive_position: Option<String>,
}

/// Level 3 output: opportunity mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityMap {
    #[serde(default)]
    pub whitespace_opportunities: Vec<WhitespaceOpportunity>,
    pub value_proposition_customization: String,

    #[serde(default)]
    pub competitive_risks: Vec<String>,
    pub recommended_approach: String,
}

// ============================================================================
// RESPONSE PARSING
// ============================================================================

/// Parse failure for one research request. Isolated: it never affects
/// reconciliation or scoring runs.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("completion contains no JSON object")]
    NoJsonObject,

    #[error("completion JSON does not match the expected schema: {0}")]
    Schema(#[source] serde_json::Error),
}

/// Locate the first balanced `{...}` object in the completion text.
///
/// Walks the text with a depth counter that is string- and escape-aware,
/// so braces inside JSON string values don't terminate the scan early.
/// Surrounding prose is ignored; an unbalanced object is an error.
pub fn extract_json_object(text: &str) -> Result<&str, ResearchError> {
    let start = text.find('{').ok_or(ResearchError::NoJsonObject)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    Err(ResearchError::NoJsonObject)
}

/// Strictly parse a completion into the expected result type.
///
/// Schema mismatches surface as [`ResearchError::Schema`] - a malformed
/// response is never silently truncated into a partial result.
pub fn parse_research_response<T: DeserializeOwned>(text: &str) -> Result<T, ResearchError> {
    let json = extract_json_object(text)?;
    serde_json::from_str(json).map_err(ResearchError::Schema)
}

// ============================================================================
// COMPLETION PROVIDER
// ============================================================================

/// The opaque text-completion collaborator.
pub trait CompletionProvider {
    fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Anthropic messages API implementation.
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        AnthropicProvider {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    pub fn with_model(api_key: String, model: String) -> Self {
        AnthropicProvider {
            api_key,
            model,
            client: reqwest::blocking::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,

    #[serde(default)]
    text: String,
}

impl CompletionProvider for AnthropicProvider {
    fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": system,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .context("research: messages request failed")?
            .error_for_status()
            .context("research: messages request rejected")?;

        let parsed: MessagesResponse = response
            .json()
            .context("research: malformed messages response envelope")?;

        let text = parsed
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(text)
    }
}

/// Build the prompt, call the collaborator, and strictly parse the result.
pub fn run_research<T: DeserializeOwned>(
    provider: &dyn CompletionProvider,
    request: &ResearchRequest,
) -> Result<T> {
    let prompt = build_research_prompt(request);
    let completion = provider.complete(SYSTEM_PROMPT, &prompt)?;
    parse_research_response(&completion)
        .with_context(|| format!("research: unusable completion for {:?}", request.level))
}

// ============================================================================
// PROMPT CONSTRUCTION
// ============================================================================

/// Assemble the layered intelligence prompt: campaign lens, seller
/// context, target company, web research, then level-specific task and
/// output-format instructions.
pub fn build_research_prompt(request: &ResearchRequest) -> String {
    let mut campaign_section = String::new();
    for campaign in &request.campaigns {
        campaign_section.push_str(&format!(
            "\n### Campaign: {} ({})\n",
            campaign.name, campaign.campaign_type
        ));
        if let Some(context) = &campaign.campaign_context {
            campaign_section.push_str(context);
            campaign_section.push('\n');
        } else {
            push_field(&mut campaign_section, "Value Proposition", &campaign.value_proposition);
            push_field(&mut campaign_section, "Pain Points", &campaign.key_pain_points);
            push_field(&mut campaign_section, "Regulatory Context", &campaign.regulatory_context);
            push_field(&mut campaign_section, "Signal Triggers", &campaign.signal_triggers);
        }
    }

    let mut seller_section = String::new();
    if let Some(seller) = &request.seller {
        seller_section.push_str("\n## YOUR COMPANY (Seller)\n");
        if let Some(context) = &seller.sales_intelligence_context {
            seller_section.push_str(context);
            seller_section.push('\n');
        } else {
            seller_section.push_str(&format!("Company: {}\n", seller.company_name));
            push_field(&mut seller_section, "Value Proposition", &seller.value_proposition);
            push_field(&mut seller_section, "Products/Services", &seller.products_services);
            push_field(&mut seller_section, "Differentiators", &seller.key_differentiators);
            push_field(
                &mut seller_section,
                "Competitive Positioning",
                &seller.competitive_positioning,
            );
        }
    }

    let mut target_section = String::new();
    if let Some(target) = &request.target {
        target_section.push_str("\n## TARGET COMPANY\n");
        target_section.push_str(&format!("Company: {}\n", target.company_name));
        push_field(&mut target_section, "Website", &target.website);
        push_field(&mut target_section, "Industry", &target.industry);
        push_field(&mut target_section, "Vertical", &target.vertical);
        if let Some(count) = target.employee_count {
            target_section.push_str(&format!("Employees: {}\n", count));
        }
        push_field(&mut target_section, "HQ", &target.headquarters);
        push_field(&mut target_section, "Summary", &target.company_summary);
        if !target.existing_signals.is_empty() {
            target_section.push_str("Existing Signals:\n");
            for signal in &target.existing_signals {
                target_section.push_str(&format!("- {}\n", signal));
            }
        }
    }

    let mut search_section = String::new();
    if !request.search_results.is_empty() {
        search_section.push_str("\n## WEB RESEARCH RESULTS\n");
        for result in &request.search_results {
            search_section.push_str(&format!("\n### Query: {}\n{}\n", result.query, result.results));
        }
    }

    let (task, output_format) = level_instructions(request.level);

    format!(
        "You are a B2B sales intelligence analyst. You have deep expertise in \
researching companies and identifying sales opportunities.

## CAMPAIGN CONTEXT (Your Intelligence Lens)
{campaign_section}{seller_section}{target_section}{search_section}
{task}
## OUTPUT FORMAT
{output_format}
Be specific and actionable. Reference the campaign context throughout your analysis.
Only include findings you have evidence for. Note confidence levels honestly."
    )
}

fn push_field(section: &mut String, label: &str, value: &Option<String>) {
    if let Some(value) = value {
        section.push_str(&format!("{}: {}\n", label, value));
    }
}

fn level_instructions(level: ResearchLevel) -> (&'static str, &'static str) {
    match level {
        ResearchLevel::TamScreening => (
            r#"
## YOUR TASK: TAM SCREENING (Level 1 - Broad)

You are performing initial screening of a TAM account against campaign criteria.
Focus on:
1. Does this company match the TARGET COMPANY PROFILE in the campaign context?
2. Are there HIGH-LEVEL SIGNALS visible that match campaign signal triggers?
3. How well does the company align with campaign pain points?
4. What's the overall fit for this campaign?

Be efficient - this is a screening pass, not deep research. Look for obvious
signals and fit indicators.
"#,
            r#"
Return JSON:
{
  "fit_score": 0-100,
  "fit_rationale": "2-3 sentence explanation of fit",
  "detected_signals": [
    {"type": "signal category", "description": "what was found", "source": "where found", "relevance": "high|medium|low"}
  ],
  "recommended_search_queries": ["queries for deeper research"],
  "priority_ranking": "high|medium|low"
}
"#,
        ),
        ResearchLevel::AccountBuilding => (
            r#"
## YOUR TASK: ACCOUNT BUILDING (Level 2 - Focused)

You are building an account profile for an account the team wants to pursue.
Use the campaign context to focus your analysis:
1. Reference the PAIN POINTS section - which apply to this company?
2. Use the SIGNAL TRIGGERS tables to categorize findings
3. Look for the specific signals described in campaign context

Build a complete account thesis: why pursue, compelling events, buying
signals, risks, and which stakeholders to target with what messaging.
"#,
            r#"
Return JSON:
{
  "thesis": "2-3 sentence compelling reason to pursue this account",
  "summary": "Executive summary of the opportunity",
  "compelling_events": [
    {"id": "uuid", "title": "event", "description": "details", "urgency": "high|medium|low", "source": "where found"}
  ],
  "buying_signals": [
    {"id": "uuid", "signal_type": "type from campaign", "description": "details", "strength": "strong|moderate|weak", "source": "where found"}
  ],
  "risks": [
    {"id": "uuid", "title": "risk", "description": "details", "severity": "high|medium|low"}
  ],
  "pain_point_alignment": [
    {"pain_point": "from campaign context", "evidence": "what we found", "confidence": "high|medium|low"}
  ],
  "stakeholder_targets": [
    {"role": "VP Product Security", "messaging_angle": "approach for this role", "priority": "primary|secondary"}
  ]
}
"#,
        ),
        ResearchLevel::OpportunityMapping => (
            r#"
## YOUR TASK: OPPORTUNITY MAPPING (Level 3 - Deep)

You are mapping opportunities within an account, using both campaign AND
company context. Focus on whitespace analysis, value mapping against their
pain points, competitive positioning, and approach strategy.
"#,
            r#"
Return JSON:
{
  "whitespace_opportunities": [
    {"product_service": "our product", "need_identified": "their need", "value_fit": "how it fits", "competitive_position": "vs alternatives"}
  ],
  "value_proposition_customization": "Customized value prop for this account",
  "competitive_risks": ["competitor threats"],
  "recommended_approach": "How to engage this account"
}
"#,
        ),
        ResearchLevel::OngoingMonitoring => (
            r#"
## YOUR TASK: ONGOING INTELLIGENCE (Continuous)

You are updating intelligence on an active account/opportunity. Focus on
new signals, urgency changes, risk updates, and opportunity expansion.
"#,
            r#"
Return JSON with updates to existing account intelligence, flagging what's
new or changed.
"#,
        ),
    }
}

// ============================================================================
// SEARCH QUERY GENERATION
// ============================================================================

/// Derive web-search queries from campaign context for a target company.
///
/// Pulls `"[Company] ..."` patterns out of the campaign markdown, adds
/// pain-point and trigger terms, deduplicates preserving order, and caps
/// the list.
pub fn search_queries(
    campaign: &CampaignContext,
    company_name: &str,
    level: ResearchLevel,
) -> Vec<String> {
    let mut queries: Vec<String> = Vec::new();

    queries.push(format!("{} company news 2025 2026", company_name));

    if let Some(context) = &campaign.campaign_context {
        // "[Company] ..." query patterns embedded in the context document.
        let pattern = Regex::new(r#""\[Company\][^"]+""#).expect("valid query pattern regex");
        for m in pattern.find_iter(context).take(6) {
            let query = m.as_str().replace('"', "").replace("[Company]", company_name);
            queries.push(query);
        }
    }

    if let Some(regulatory) = &campaign.regulatory_context {
        let terms: Vec<&str> = regulatory.split_whitespace().take(4).collect();
        if !terms.is_empty() {
            queries.push(format!("{} {}", company_name, terms.join(" ")));
        }
    }

    if let Some(pain_points) = &campaign.key_pain_points {
        if let Some(first) = pain_points.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                queries.push(format!("{} {}", company_name, first));
            }
        }
    }

    if let Some(triggers) = &campaign.signal_triggers {
        if let Some(first) = triggers.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                queries.push(format!("{} {}", company_name, first));
            }
        }
    }

    match level {
        ResearchLevel::TamScreening => {
            queries.push(format!("{} cybersecurity", company_name));
            queries.push(format!("{} product security", company_name));
        }
        ResearchLevel::AccountBuilding => {
            queries.push(format!("{} security leadership", company_name));
            queries.push(format!("{} compliance regulation", company_name));
        }
        _ => {}
    }

    // Deduplicate preserving first occurrence, then cap.
    let mut seen = std::collections::HashSet::new();
    queries.retain(|q| seen.insert(q.clone()));
    queries.truncate(MAX_SEARCH_QUERIES);
    queries
}

// ============================================================================
// TESTS
// ============================================================================
