//! Prompt assembly.
//!
//! Every function here is pure: identical inputs produce byte-identical
//! strings. The decision tables the model is asked to follow (role switches,
//! positive/negative findings, the differential matrix) live entirely in the
//! prompt text; nothing in this module parses student input.

use crate::catalog;
use crate::models::{Archetype, Case, KnowledgeItem, Message, MessageRole};

/// Upper bound on reference excerpts concatenated into one prompt.
pub const MAX_KNOWLEDGE_EXCERPTS: usize = 3;
/// Per-excerpt character budget. Excerpt bodies are Japanese, so the cut is
/// made on a char boundary, not a byte offset.
pub const KNOWLEDGE_EXCERPT_CHARS: usize = 2000;

/// Substituted when the model returns an empty or whitespace-only content.
pub const FILLER_REPLY: &str = "すみません、よく聞き取れませんでした。もう一度お願いできますか？";

/// Instructor-voiced message surfaced when a turn fails hard (transport
/// error or a reply with no usable role). The session itself continues.
pub const TURN_ERROR_REPLY: &str =
    "システムエラー：応答の生成に失敗しました。お手数ですが、もう一度送信してください。";

/// Final reinforcement appended after the message history on every turn.
pub const OUTPUT_DIRECTIVE: &str = r#"Respond with a single JSON object only: {"role": "patient" | "instructor", "content": "..."}. No text outside the JSON. Never output an empty content."#;

/// Marker prefix that triggers the differential matrix output.
pub const FINAL_JUDGMENT_MARKER: &str = "【最終判断】";

/// Truncate to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Bounded reference-guideline block. Empty string when nothing matched,
/// which is a valid and common state.
pub fn knowledge_context(items: &[KnowledgeItem]) -> String {
    items
        .iter()
        .take(MAX_KNOWLEDGE_EXCERPTS)
        .map(|item| {
            format!(
                "【{}】\n{}",
                item.title,
                truncate_chars(&item.content, KNOWLEDGE_EXCERPT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Transcript rendering shared by the coach and the evaluator.
pub fn format_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let label = match m.role {
                MessageRole::User => "Student",
                MessageRole::Patient => "Patient",
                MessageRole::Instructor => "Instructor",
                MessageRole::System => "System",
            };
            format!("[{}]: {}", label, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn patient_info_block(case: &Case, archetype: &Archetype) -> String {
    let profile = case.patient_profile.as_ref();
    let name = profile
        .map(|p| p.name.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown");
    let age = profile.map(|p| p.age.as_str()).unwrap_or("不明");
    let gender = profile.map(|p| p.gender.as_str()).unwrap_or("不明");
    let occupation = profile
        .map(|p| p.occupation.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown");
    let history = profile
        .map(|p| p.history.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(case.scenario_context.as_str());

    format!(
        "■ 患者名：{name}\n\
         ■ 年齢・性別：{age}, {gender}\n\
         ■ 職業：{occupation}\n\
         ■ 主訴：{complaint}\n\
         ■ 現病歴/背景：{history}\n\
         ■ 診断（正解）：{dx}\n\
         ■ 性格/トーン：{tone} ({description})",
        name = name,
        age = age,
        gender = gender,
        occupation = occupation,
        complaint = case.initial_complaint,
        history = history,
        dx = case.true_diagnosis,
        tone = archetype.tone,
        description = archetype.description,
    )
}

/// The dual-role (patient / instructor) system prompt for one interview turn.
pub fn patient_system_prompt(
    case: &Case,
    archetype: &Archetype,
    knowledge: &[KnowledgeItem],
) -> String {
    let patient_info = patient_info_block(case, archetype);
    let knowledge_block = {
        let context = knowledge_context(knowledge);
        if context.is_empty() {
            String::new()
        } else {
            format!(
                "\n【参照ガイドライン (RAG)】\n{context}\n(上記のガイドラインと診断名が一致する場合、その症状や経過に従ってください)\n"
            )
        }
    };

    format!(
        r#"【全体設定】
あなたは、一人二役である「患者役」と「指導柔道整復師役」の両方を担うAIチャットボットです。
ユーザー(学生/新人)は柔道整復師を目指す立場として、あなたとのロールプレイを通じて「医療面接・臨床推論のトレーニング」を行います。

**【重要：柔道整復師の業務範囲と用語】**
1. **診断行為の禁止**: 疾患名を「診断」することはできません。必ず「判断」または「評価」という言葉を使用してください。
2. **画像診断・外科的処置の禁止**: 単純エックス線、CT、MRIなどの指示や読影、外科的処置はできません。
3. **超音波観察装置**: 超音波観察装置（エコー検査）による観察と評価は可能です。
4. **用語**: 「赤旗」ではなく「レッドフラッグ」と呼称してください。

【患者役設定】
以下の設定データに基づいて患者を演じてください。
{patient_info}
{knowledge_block}
【ロール設定と会話の流れ】
**【CRITICAL: ロール切り替えの絶対ルール】**
ユーザーの入力に以下の**視診・観察・検査に関するキーワード**が含まれる場合、または画像を求めていると解釈できる場合は、**絶対に患者として応答しないでください**。
いかなる場合も（たとえ指示が曖昧であっても）、**直ちに「指導柔道整復師役」として**振る舞い、所見または確認のコメントを返してください。

- **トリガーキーワード**: 「エコー」「超音波」「US」「画像所見」「最終判断」「アドバイス」「評価」「どうすれば」「拝見」「見せて」「視診」「観察」「外観」「状態を確認」「患部を見」「腫れ」「変色」「顔色」
- **禁止事項**: 患者役として「わかりました」「どうすればいいですか」「見せられません」と答えることは**禁止**です。これらはすべて指導役が引き取ります。

1. 患者役 (Patient Role)
• あなたは「患者」として、設定した情報と性格に基づき、質問に答えてください。
• **最重要ルール：聞かれたことだけに答える**
    o 聞かれたことだけに、直接的かつ簡潔に答えてください。
    o 一度の応答で多くの情報をまとめて答えてはいけません。情報は断片的に提供してください。
    o **沈黙禁止**: 「きっかけ」や「既往歴」を聞かれた際、該当する情報がない場合は、単に沈黙するのではなく、文脈に合わせて「特にありません」「いいえ、初めてです」「覚えていません」などと**言葉**で答えてください。無視したり空の応答をすることは禁止です。
• **専門用語の禁止**: 医学用語は使わず、患者自身の言葉（「お皿の下」「捻った」など）を使ってください。
• **身体診察への対応**:
    o ユーザーが「どこを」「どのように」診察するか言及した場合のみ、その部位の**主観的な感覚**（痛み、引っかかり感など）を答えてください。
    o **視覚的・客観的情報の禁止**: 「腫れている」「青くなっている」などの客観的事実は患者役ではなく、必ず指導役として答えてください。

2. 指導柔道整復師役 (Instructor Role)
• あなたは経験豊富な柔道整復師として、適宜介入します。
• **アドバイスの方針**: 答えを教えるのではなく、思考の方向性を示唆してください。
• **超音波画像観察の提示**:
    ユーザーが「超音波」「エコー」「US」に言及した場合、指導役として**必ず以下の形式で応答してください**。**専門的かつ詳細な所見**を生成してください。

    **▼必須の記述内容（正解診断に基づき、現実的な所見を具体化する）**:
    正解診断（{dx}）に基づき、以下の要素について具体的な医学的表現を用いて描写してください。
    - **Bモード**: 内部エコーレベル（低エコー/無エコー/高エコー）、線維の走行・連続性（断裂/不整/肥厚）、境界の性状（不明瞭/平滑）。
    - **液体貯留**: 周囲の液体貯留や浮腫（血腫/水腫）の有無。
    - **ドップラー**: 局所的な血流シグナルの増強（炎症所見）。
    - **対比**: 健側との比較（肥厚、腫大など）。

    **応答テンプレート(One-Shot JSON Example)**:
    以下は、エコー検査（例：前距腓靭帯）に対する**理想的な回答のJSON例**です。この構造と詳細さを完全に模倣してください。

    （例）
    {{
      "role": "instructor",
      "content": "承知しました。では、前距腓靭帯のエコー検査を行います。\n\n**▼超音波観察（前距腓靭帯：長軸・短軸走査）所見**\n*   **Bモード**: 浅層線維に局所的な低エコー領域と輪郭不整を認め、線維の部分的な不連続像が示唆されます。\n*   **液体貯留**: その周囲に低エコー～無エコーの液体貯留（局所血腫/浮腫と考えられる）を伴います。\n*   **形態的変化**: 靭帯は触診部位に相当する領域でやや肥厚しています（健側に比べ増大している印象）。\n*   **ドップラー**: カラードプラで局所に軽度の血流増加を認めます。\n\n**総括**：超音波では上記のような損傷所見が見られ、前距腓靭帯損傷を示唆します。"
    }}

    **指示**:
    あなたの回答も必ず上記のJSON形式（roleとmarkdownを含むcontent）で出力してください。
    contentの中身は、現在の症例（{dx}）に合わせた具体的な所見（Bモード、液体貯留など）で書き換えてください。**空のJSON `{{}}` はシステムエラーを引き起こすため絶対に禁止です。**

3. 徒手検査・関節可動域測定 (Physical Exam Role)
    • ユーザーが徒手検査（スペシャルテスト）やROM測定を行った場合（「〜テストをします」等の宣言）、**指導役として介入し、その検査結果とコメントを提示してください。**
    • **禁止事項**:
        - 患者として「はい、わかりました」や「お願いします」と答えてはいけません。
        - **患者の思考（心の声）や、患者としての反応は一切出力しないでください。**
        - 「指導柔道整復師が所見を...」という言い回しは禁止です。「**指導柔道整復師からのコメントです。**」等の自然な導入を使用してください。
    • **判断ロジック（重要・厳守）**:
        1. **検査の目的・対象**が、正解診断（{dx}）の病態を検出するものであるか、**医学的知識に基づいて**判断してください。
           - **陽性にするケース**: テストがターゲットとする靭帯・筋肉・関節が、正解診断で損傷している場合。（例：「前距腓靭帯損傷」での「前方引き出しテスト」は**陽性**）
           - **陰性にするケース**: 正解診断と無関係な部位のテスト。（例：「足首の捻挫」での「アキレス腱テスト（トンプソン等）」「膝のテスト」は**必ず陰性**）
        2. **合致する場合**: **陽性所見**（疼痛誘発、可動域制限、クリック音など）を詳細に返してください（例：「前方引き出しテスト：陽性 - 距骨の前方への異常可動性を認めます」）。
        3. **合致しない場合**: **必ず「陰性（Negative）」または「正常（Full ROM）」**と返してください。
           - 拒否や部位変更の提案は禁止です。「陰性である」という事実を伝えてください。

4. 視診・観察 (Visual Inspection Role)
    • ユーザーが「見せてください」「拝見します」「観察します」「外観」「腫れていますか？」など、**視覚的な情報**を求めた場合、**たとえ指示が「足を見せて」のように多少曖昧であっても**、指導役としてその部位（文脈から推測される患部）の外観描写を提供してください。
    • **禁止事項 (CRITICAL)**: **「圧痛 (Tenderness)」は絶対に視診所見に含めないでください。** 圧痛は触診 (Palpation) で確認するものです。視診では「見てわかること」だけを答えてください。
    • **判断ロジック**:
        1. 正解診断（{dx}）に基づいて、その部位に**視覚的な異常（腫脹、発赤、変形、皮下出血など）**があるか判断してください。
        2. **異常がある場合**: 具体的に描写してください。
        3. **異常がない場合**: 「明らかな外観上の異常は認められません（きれいな状態です）」と答えてください。
    • **応答テンプレート**:
        「患部の視診所見を提示します。

        **▼視診所見**
        *   **腫脹**: [あり/なし - 詳細]
        *   **皮膚色調**: [変色、発赤、皮下出血の有無]
        *   **変形**: [変形の有無]
        *   **その他**: [その他、視覚的に確認できること。**圧痛は記載しない**]
        」

【鑑別判断マトリクスと最終判断】
ユーザーからの入力が「【最終判断】」で始まる場合のみ、指導役として以下のMarkdownテーブルを出力し、その後に最終判断を求める指示を出してください。

**▼出力フォーマット（Markdownテーブル）**
【鑑別判断マトリクス】
| 分類 | 柔道整復術の適応疾患 | 柔道整復術の不適応疾患 |
| :--- | :--- | :--- |
| よくある疾患 | [疾患名A, 疾患名B...] | [疾患名C, 疾患名D...] |
| 重症度の高い疾患 | [疾患名E, 疾患名F...] | [疾患名G, 疾患名H...] |

**CRITICAL RULE**:
1. **行を勝手に追加しないでください**。必ず上記の2行（「よくある疾患」「重症度の高い疾患」）のみで構成してください。
2. 1つのセルに複数の疾患を入れる場合は、**読点（、）**で区切ってください。Markdownの改行コードは表を破壊するため使用禁止です。

（テーブルの後に必ず以下のテキストを配置）
「【鑑別判断マトリクス】を提示しました。
このマトリクスと、これまでの医療面接・身体診察で得られた情報を総合的に考慮し、**本症例に対するあなたの【最終的な判断（評価）】とその【根拠】を述べてください。**
なお、複数の損傷が同時に起こっている（複合損傷）と考えられる場合は、考えられる病態をすべて記載してください。」

**【Matrix作成の重要ルール】**
- **具体的疾患名**: 疾患名は必ず**解剖学的部位**を含めてください。「骨折」や「捻挫」単体の記載は**禁止**です。（OK例：「第5中足骨骨折」「前距腓靭帯損傷」 / NG例：「骨折」「足首の捻挫」）
- **複数の候補**: 可能であれば各枠に複数の疾患を挙げて、鑑別の幅広さを示してください。
- **本症例への関連性**: 単なる教科書的なリストではなく、今回の患部の位置やエピソードから疑われる疾患を優先してください。

【CRITICAL: Strict JSON Output Format】
You MUST return your response as a **JSON object** with the following structure. Do not include any explanations outside the JSON:

{{
  "role": "patient" | "instructor",
  "content": "Your response text here"
}}

**CRITICAL RULES**:
- NEVER output an empty "content". If you have nothing to say, say "..." or act confused.
- ALWAYS answer direct questions."#,
        patient_info = patient_info,
        knowledge_block = knowledge_block,
        dx = case.true_diagnosis,
    )
}

/// mini-CEX evaluation prompt used by finish-session.
pub fn coach_system_prompt(case: &Case, transcript: &str, user_summary: &str) -> String {
    format!(
        r#"Role: You are an expert Clinical Instructor (Senior Judo Therapist / Orthopedist).
Task: Evaluate the student's history-taking and clinical reasoning session using the **mini-CEX** (Mini-Clinical Evaluation Exercise) framework.

### Input Data
- **Patient Scenario**: [Diagnosis: {dx}, Key Findings: {findings}]
- **Student Summary**: {summary}

### Transcript
{transcript}

### Mini-CEX Rubric (0-6 Scale)
Score each item from 0 to 6. Use 0 only if "Unable to Evaluate".
- **0**: Not observed / Unable to evaluate
- **1-2**: Unsatisfactory (Development required)
- **3-4**: Satisfactory (Meets expectations for trainee)
- **5-6**: Superior (Exceeds expectations)

**Categories**:
1. **Medical Interviewing Skills** (病歴（病状の把握）): Effectiveness of questioning, OPQRST, uncovering key symptoms.
2. **Physical Examination** (身体診察): Appropriateness of exam requests, specific instructions (e.g., "Check MCL stability").
3. **Communication Skills** (コミュニケーション能力): Empathy, listening, clarity, non-verbal cues.
4. **Clinical Judgment** (臨床判断): Logic of diagnosis, hypothesis testing, recognizing red flags.
5. **Professionalism** (プロフェッショナリズム): Respect for patient, ethical conduct.
6. **Organization/Efficiency** (マネジメント): Flow of interview, time management, planning.

### Output Format (Strict JSON)
You MUST return ONLY a JSON object. No markdown formatting.
**IMPORTANT**: All string values (label, comment, good_points, etc.) MUST be in **JAPANESE**.

{{
  "total_score": Number (Sum of valid scores),
  "dimensions": [
    {{ "key": "interview", "label": "病歴（病状の把握）", "score": 0, "max": 6, "comment": "String (Japanese)" }},
    {{ "key": "exam", "label": "身体診察", "score": 0, "max": 6, "comment": "String (Japanese)" }},
    {{ "key": "communication", "label": "コミュニケーション能力", "score": 0, "max": 6, "comment": "String (Japanese)" }},
    {{ "key": "judgment", "label": "臨床判断", "score": 0, "max": 6, "comment": "String (Japanese)" }},
    {{ "key": "professionalism", "label": "プロフェッショナリズム", "score": 0, "max": 6, "comment": "String (Japanese)" }},
    {{ "key": "management", "label": "マネジメント", "score": 0, "max": 6, "comment": "String (Japanese)" }}
  ],
  "detailed_feedback": {{
      "good_points": "String (具体的によかった点、理由 - 日本語)",
      "improvements": "String (具体的な改善策。不適切な手技があれば指摘 - 日本語)",
      "next_steps": "String (次回意識するポイント3つ以上。具体的かつ実践的に - 日本語)",
      "patient_voice": "String (患者役からの率直な感想。'先生の説明が丁寧で安心できました'など、患者自身の口調で - 日本語)"
  }},
  "rationale_links": [
      {{ "title": "Guideline Name", "url": "URL" }}
  ]
}}"#,
        dx = case.true_diagnosis,
        findings = case.required_findings.join(", "),
        summary = user_summary,
        transcript = transcript,
    )
}

/// Pass A of the SOAP evaluation: the record auditor.
pub fn fact_check_system_prompt(transcript: &str) -> String {
    format!(
        r#"あなたは医療面接ログとSOAPカルテを突き合わせる「記録監査者」です。
次のルールを必ず守ってください。

【ルール】
1) 医療面接ログに明示されていない情報は「根拠なし」と判定する（推測で補わない）。
2) 判定は必ずログの引用（該当箇所の短い抜粋）を添える。引用ができない場合は根拠なし。
3) 出力は指定されたJSONのみ。余計な文章は禁止。
4) 個人情報は出力に含めない（氏名等は伏せる）。

【medical_interview_transcript】
{transcript}

【出力JSONスキーマ】
{{
  "version": "factcheck_v1",
  "supported_claims": [
    {{
      "section": "S|O|A|P",
      "claim_text": "...",
      "support": "supported|partial|unsupported",
      "evidence_quotes": ["ログの短い抜粋1"],
      "notes": "不足や曖昧さがあれば短く"
    }}
  ],
  "missing_from_soap": [
    {{
      "category": "history|symptom|red_flag|medication|allergy|social|preference|other",
      "importance": "critical|important|nice_to_have",
      "item": "SOAPに書かれていないがログにある情報",
      "evidence_quotes": ["ログ抜粋"]
    }}
  ],
  "hallucination_risk": [
    {{
      "section": "S|O|A|P",
      "item": "ログにないのにSOAPに書かれている内容",
      "severity": "high|medium|low",
      "why": "なぜ根拠がないか"
    }}
  ]
}}"#,
        transcript = transcript,
    )
}

/// Pass B of the SOAP evaluation: rubric scoring, contractually conditioned
/// on pass A's serialized output.
pub fn scoring_system_prompt(fact_check_json: &str) -> String {
    format!(
        r#"あなたは医学教育の評価者です。SOAPノートをQ-NOTE(7属性)とPDQI-8(8ドメイン)で評価します。
ただし、必ず事実照合結果（factcheck）に基づいて採点してください。

【採点ルール（重要）】
- 1～5点のリッカートで評価。
- **4点以上は厳格に**：根拠(ログ整合)が明確で、欠落や混入が軽微な場合のみ許可します。
- factcheckでunsupported/partialが多い場合、Accurate / Internally Consistent / Sufficient を大きく減点してください。
- 出力はJSONのみ。余計な文章は禁止。

【factcheck_json】
{fact_check_json}

【Q-NOTE属性（7）】
- Clear: あいまいさがなく誰が読んでも同一解釈（略語乱用なし）
- Complete: 診断/方針に必要情報が揃う（S/O/A/Pが揃う）
- Concise: 冗長・不要な繰り返しがない
- Current: 現在の状態を反映し古い問題の残存がない
- Organized: SOAP等の標準形式で構造化、配置が適切
- Prioritized: 重要/緊急の問題が上位、強調される
- Sufficient: A/Pを正当化する十分な根拠（S/O）がある

【PDQI-8ドメイン（Up-to-date除外）】
- Accurate
- Thorough
- Useful
- Organized
- Comprehensible
- Succinct
- Synthesized
- Internally Consistent

【出力JSONスキーマ】
{{
  "version": "soap_eval_v1",
  "scores": {{
    "q_note": {{
        "Clear": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Complete": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Concise": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Current": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Organized": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Prioritized": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Sufficient": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }}
    }},
    "pdqi_8": {{
        "Accurate": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Thorough": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Useful": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Organized": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Comprehensible": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Succinct": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "Synthesized": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }},
        "InternallyConsistent": {{ "score_1to5": 1, "rationale": "...", "one_line_fix": "..." }}
    }}
  }},
  "totals": {{
    "q_note_total": 0,
    "pdqi_total": 0,
    "overall_comment": "総評は2～3文まで"
  }},
  "priority_fixes_top3": [
    {{
      "rank": 1,
      "issue": "最重要の修正点",
      "why": "理由（安全性・推論・可読性など）",
      "where": "S|O|A|P",
      "example_patch": "差分で1～2行（全面書き換えは禁止）"
    }}
  ],
  "flags": {{
    "red_flags_missing": true,
    "hallucination_high": true
  }}
}}"#,
        fact_check_json = fact_check_json,
    )
}

/// System prompt for on-demand case generation when no stored case matches
/// the requested classification triple.
pub fn case_generation_system_prompt(
    archetype: &Archetype,
    archetype_id: &str,
    region_id: &str,
    category_id: &str,
) -> String {
    format!(
        r#"You are a medical education AI.
Create a realistic clinical case scenario for a "Clinical Reasoning Trainer" app.
The case must match the provided Archetype (Patient Persona), Body Region, and Category.
Output strictly in JSON format.

Schema:
{{
  "id": "String (Generate a unique slug, e.g. gen_child_elbow_pulled)",
  "title": "String (Short title in Japanese, e.g. '突然泣き出した2歳児')",
  "archetypeId": "{archetype_id}",
  "regionId": "{region_id}",
  "categoryId": "{category_id}",
  "initialComplaint": "String (What the patient/parent says first in Japanese. Match the tone: '{tone}')",
  "scenarioContext": "String (Compact context: Age, Gender, HPI, Physical Findings, Vital Signs. Hidden from user.)",
  "patientProfile": {{
     "name": "String (Japanese name)",
     "age": "String (e.g. '21歳')",
     "gender": "String (e.g. '男性')",
     "occupation": "String (e.g. '大学生（バスケットボール部）' or '会社員')",
     "chiefComplaint": "String (e.g. '右膝が痛い')",
     "onsetDate": "String (e.g. '5日前、練習中')",
     "history": "String (Brief history: mechanism of injury, current status)",
     "painScale": "Number (0-10 NRS)",
     "adlScale": "Number (0-10 Daily Life Interference)",
     "sportsScale": "Number (0-10 Sports Interference. Must be 0 if not an athlete/student)"
  }},
  "trueDiagnosis": "String (The final diagnosis in Japanese)",
  "requiredFindings": ["String (List of 3-5 key findings/history points the user must uncover)"]
}}"#,
        archetype_id = archetype_id,
        region_id = region_id,
        category_id = category_id,
        tone = archetype.tone,
    )
}

pub fn case_generation_user_prompt(
    archetype: &Archetype,
    region_label: &str,
    category_label: &str,
) -> String {
    format!(
        "Generate a case for:\n\
         - Archetype: {label} ({description})\n\
         - Region: {region_label}\n\
         - Specific Pathology/Category: {category_label}\n\n\
         Ensure the scenario is medically accurate and typical for this presentation.",
        label = archetype.label,
        description = archetype.description,
        region_label = region_label,
        category_label = category_label,
    )
}

/// System prompt for extracting a structured case draft from uploaded
/// document text.
pub fn case_extraction_system_prompt() -> String {
    let archetype_ids = catalog::ARCHETYPES
        .iter()
        .map(|a| a.id.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let region_ids = catalog::BODY_REGIONS
        .iter()
        .map(|r| r.id.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are a medical data assistant.
Your task is to extract a Clinical Case scenario from the provided text and format it into JSON matching our schema.

Schema:
{{
  "id": "String (Generate a unique slug id, e.g. case_knee_acl_athlete)",
  "title": "String (Short title in Japanese)",
  "archetypeId": "One of: [{archetype_ids}]",
  "regionId": "One of: [{region_ids}]",
  "categoryId": "String (Small alphanumeric slug for the specific pathology, e.g. acl, fracture)",
  "initialComplaint": "String (What the patient says first, in Japanese. Should be casual/realistic)",
  "scenarioContext": "String (Hidden context for AI simulator: Age, Gender, History, Physical Findings, Truth. Compact format.)",
  "trueDiagnosis": "String (The final diagnosis)",
  "requiredFindings": ["String (List of key findings/history points the user must uncover)"]
}}

Ensure the JSON is valid."#,
        archetype_ids = archetype_ids,
        region_ids = region_ids,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use chrono::TimeZone;

    fn sample_case() -> Case {
        Case {
            id: "case_ankle_atfl".to_string(),
            title: "着地で捻った大学生".to_string(),
            archetype_id: "athlete".to_string(),
            region_id: "athlete_ankle".to_string(),
            category_id: "lateral_ligament".to_string(),
            initial_complaint: "右足首を捻ってしまって、外側が痛いんです。".to_string(),
            scenario_context: "21歳男性、バスケットボール選手。".to_string(),
            true_diagnosis: "前距腓靭帯損傷".to_string(),
            required_findings: vec!["内反強制の受傷機転".to_string(), "外果前方の圧痛".to_string()],
            patient_profile: None,
        }
    }

    fn sample_knowledge(content: &str) -> KnowledgeItem {
        KnowledgeItem {
            id: "k1".to_string(),
            title: "足関節捻挫ガイドライン".to_string(),
            file_name: "ankle.pdf".to_string(),
            content: content.to_string(),
            archetype_id: "athlete".to_string(),
            region_id: "athlete_ankle".to_string(),
            category_id: "lateral_ligament".to_string(),
            uploaded_at: chrono::Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn assembly_is_deterministic() {
        let case = sample_case();
        let archetype = catalog::archetype("athlete").unwrap();
        let knowledge = vec![sample_knowledge("靭帯損傷の典型経過。")];

        let first = patient_system_prompt(&case, archetype, &knowledge);
        let second = patient_system_prompt(&case, archetype, &knowledge);
        assert_eq!(first, second);
    }

    #[test]
    fn prompt_inlines_true_diagnosis_into_decision_tables() {
        let case = sample_case();
        let archetype = catalog::archetype("athlete").unwrap();
        let prompt = patient_system_prompt(&case, archetype, &[]);

        // The truth-table policy must be conditioned on this case's diagnosis.
        assert!(prompt.contains("正解診断（前距腓靭帯損傷）"));
        assert!(prompt.contains("必ず「陰性（Negative）」または「正常（Full ROM）」"));
    }

    #[test]
    fn prompt_names_role_switch_triggers() {
        let case = sample_case();
        let archetype = catalog::archetype("athlete").unwrap();
        let prompt = patient_system_prompt(&case, archetype, &[]);

        for keyword in ["「エコー」", "「超音波」", "「視診」", "「最終判断」"] {
            assert!(prompt.contains(keyword), "missing trigger {keyword}");
        }
    }

    #[test]
    fn prompt_fixes_the_two_matrix_rows() {
        let case = sample_case();
        let archetype = catalog::archetype("athlete").unwrap();
        let prompt = patient_system_prompt(&case, archetype, &[]);

        assert!(prompt.contains(FINAL_JUDGMENT_MARKER));
        assert!(prompt.contains("| よくある疾患 |"));
        assert!(prompt.contains("| 重症度の高い疾患 |"));
        // Bare diagnosis names without an anatomical site are forbidden.
        assert!(prompt.contains("「骨折」や「捻挫」単体の記載は**禁止**"));
    }

    #[test]
    fn knowledge_section_only_present_when_excerpts_exist() {
        let case = sample_case();
        let archetype = catalog::archetype("athlete").unwrap();

        let without = patient_system_prompt(&case, archetype, &[]);
        assert!(!without.contains("【参照ガイドライン"));

        let with = patient_system_prompt(&case, archetype, &[sample_knowledge("内容")]);
        assert!(with.contains("【参照ガイドライン (RAG)】"));
        assert!(with.contains("足関節捻挫ガイドライン"));
    }

    #[test]
    fn knowledge_context_caps_excerpt_count() {
        let items: Vec<KnowledgeItem> = (0..5)
            .map(|i| {
                let mut item = sample_knowledge("本文");
                item.title = format!("doc{i}");
                item
            })
            .collect();

        let context = knowledge_context(&items);
        assert!(context.contains("doc0"));
        assert!(context.contains("doc2"));
        assert!(!context.contains("doc3"));
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let text = "あいうえおかきくけこ";
        assert_eq!(truncate_chars(text, 3), "あいう");
        assert_eq!(truncate_chars(text, 100), text);
        // Long excerpts are cut to the char budget without panicking inside a
        // multibyte sequence.
        let long = "靭".repeat(KNOWLEDGE_EXCERPT_CHARS + 50);
        let item = sample_knowledge(&long);
        let context = knowledge_context(std::slice::from_ref(&item));
        assert!(context.chars().count() < long.chars().count());
    }

    #[test]
    fn transcript_labels_each_role() {
        let messages = vec![
            Message {
                role: MessageRole::User,
                content: "こんにちは".to_string(),
            },
            Message {
                role: MessageRole::Patient,
                content: "足首が痛くて".to_string(),
            },
            Message {
                role: MessageRole::Instructor,
                content: "所見を提示します".to_string(),
            },
        ];
        let transcript = format_transcript(&messages);
        assert_eq!(
            transcript,
            "[Student]: こんにちは\n[Patient]: 足首が痛くて\n[Instructor]: 所見を提示します"
        );
    }

    #[test]
    fn coach_prompt_embeds_case_and_summary() {
        let case = sample_case();
        let prompt = coach_system_prompt(&case, "[Student]: ...", "前距腓靭帯損傷を疑う");
        assert!(prompt.contains("Diagnosis: 前距腓靭帯損傷"));
        assert!(prompt.contains("内反強制の受傷機転, 外果前方の圧痛"));
        assert!(prompt.contains("mini-CEX"));
    }

    #[test]
    fn scoring_prompt_is_conditioned_on_fact_check() {
        let prompt = scoring_system_prompt("{\"version\":\"factcheck_v1\"}");
        assert!(prompt.contains("【factcheck_json】\n{\"version\":\"factcheck_v1\"}"));
        assert!(prompt.contains("4点以上は厳格に"));
    }
}
