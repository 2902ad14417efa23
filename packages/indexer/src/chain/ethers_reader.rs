use async_trait::async_trait;
use ethers::abi::{parse_abi, Abi, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Filter, TransactionRequest, H256, U256};
use ethers::utils::{keccak256, to_checksum};
use tracing::{debug, info};

use super::{ChainError, ChainReader, EventLog};
use crate::models::ChainRecord;

/// Creation event emitted once per registry entry; topic 1 carries the id
pub const REGISTERED_EVENT: &str = "AgentRegistered(uint256,address,string,uint8)";

const REGISTRY_ABI: &[&str] = &[
    "function getAgent(uint256 tokenId) view returns ((uint256,address,string,string,uint256,bool,bool,uint8,uint256,string,uint256,uint256))",
    "function getCredScore(uint256 tokenId) view returns (uint8)",
    "function points(uint256 tokenId) view returns (uint256)",
    "function ownerOf(uint256 tokenId) view returns (address)",
    "function totalAgents() view returns (uint256)",
];

// Field positions inside the getAgent tuple
const FIELD_ADDRESS: usize = 1;
const FIELD_NAME: usize = 2;
const FIELD_FRAMEWORK: usize = 3;
const FIELD_CREATED_AT: usize = 4;
const FIELD_VERIFIED: usize = 5;
const FIELD_SOULBOUND: usize = 6;
const FIELD_ORIGIN: usize = 7;

pub fn registered_event_topic() -> H256 {
    H256::from(keccak256(REGISTERED_EVENT.as_bytes()))
}

/// [`ChainReader`] over an ethers HTTP provider
pub struct EthersChainReader {
    provider: Provider<Http>,
    registry: Address,
    abi: Abi,
}

impl EthersChainReader {
    pub fn new(provider_url: &str, registry: Address) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(provider_url)
            .map_err(|e| ChainError::Provider(format!("Failed to create HTTP provider: {}", e)))?;
        let abi = parse_abi(REGISTRY_ABI)
            .map_err(|e| ChainError::Decode(format!("Invalid registry ABI: {}", e)))?;

        info!("Registry reader created for contract {:?}", registry);
        Ok(Self {
            provider,
            registry,
            abi,
        })
    }

    async fn call(&self, name: &str, id: Option<u64>) -> Result<Vec<Token>, ChainError> {
        let function = self
            .abi
            .function(name)
            .map_err(|e| ChainError::Decode(format!("{}: {}", name, e)))?;
        let args: Vec<Token> = id.map(|id| Token::Uint(U256::from(id))).into_iter().collect();
        let data = function
            .encode_input(&args)
            .map_err(|e| ChainError::Decode(format!("{}: {}", name, e)))?;

        let tx: TypedTransaction = TransactionRequest::new().to(self.registry).data(data).into();
        let raw = self
            .provider
            .call(&tx, None)
            .await
            .map_err(|e| ChainError::Provider(format!("{} call failed: {}", name, e)))?;

        function
            .decode_output(&raw)
            .map_err(|e| ChainError::Decode(format!("{} output: {}", name, e)))
    }

    async fn call_single(&self, name: &str, id: Option<u64>) -> Result<Token, ChainError> {
        self.call(name, id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ChainError::Decode(format!("{} returned no values", name)))
    }
}

fn uint(token: &Token, what: &str) -> Result<U256, ChainError> {
    match token {
        Token::Uint(value) => Ok(*value),
        other => Err(ChainError::Decode(format!("{}: expected uint, got {:?}", what, other))),
    }
}

fn u256_to_f64(value: U256) -> f64 {
    if value <= U256::from(u128::MAX) {
        value.as_u128() as f64
    } else {
        f64::MAX
    }
}

fn u256_to_u64(value: U256, what: &str) -> Result<u64, ChainError> {
    if value > U256::from(u64::MAX) {
        return Err(ChainError::Decode(format!("{} out of range: {}", what, value)));
    }
    Ok(value.as_u64())
}

fn parse_agent(fields: &[Token]) -> Result<ChainRecord, ChainError> {
    let field = |index: usize| {
        fields
            .get(index)
            .ok_or_else(|| ChainError::Decode(format!("getAgent tuple missing field {}", index)))
    };
    let string = |index: usize| match field(index)? {
        Token::String(value) => Ok(value.clone()),
        other => Err(ChainError::Decode(format!("field {}: expected string, got {:?}", index, other))),
    };
    let boolean = |index: usize| match field(index)? {
        Token::Bool(value) => Ok(*value),
        other => Err(ChainError::Decode(format!("field {}: expected bool, got {:?}", index, other))),
    };

    let subject_address = match field(FIELD_ADDRESS)? {
        Token::Address(address) => to_checksum(address, None),
        other => return Err(ChainError::Decode(format!("agentAddress: expected address, got {:?}", other))),
    };
    let origin = uint(field(FIELD_ORIGIN)?, "mintOrigin")?;

    Ok(ChainRecord {
        display_name: string(FIELD_NAME)?,
        subject_address,
        category: string(FIELD_FRAMEWORK)?,
        verified: boolean(FIELD_VERIFIED)?,
        locked: boolean(FIELD_SOULBOUND)?,
        origin_code: origin.min(U256::from(u8::MAX)).low_u32() as u8,
        created_at: u256_to_u64(uint(field(FIELD_CREATED_AT)?, "createdAt")?, "createdAt")?,
    })
}

#[async_trait]
impl ChainReader for EthersChainReader {
    async fn get_block_number(&self) -> Result<u64, ChainError> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Provider(format!("Failed to get block number: {}", e)))?;
        Ok(number.as_u64())
    }

    async fn get_logs(
        &self,
        address: Address,
        topic: H256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventLog>, ChainError> {
        let filter = Filter::new()
            .address(address)
            .topic0(topic)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.provider.get_logs(&filter).await.map_err(|e| {
            ChainError::Provider(format!("getLogs {}-{} failed: {}", from_block, to_block, e))
        })?;
        debug!("getLogs {}-{} returned {} logs", from_block, to_block, logs.len());

        Ok(logs
            .into_iter()
            .map(|log| EventLog {
                block_number: log.block_number.map(|n| n.as_u64()),
                topics: log.topics,
            })
            .collect())
    }

    async fn get_record(&self, id: u64) -> Result<ChainRecord, ChainError> {
        match self.call_single("getAgent", Some(id)).await? {
            Token::Tuple(fields) => parse_agent(&fields),
            other => Err(ChainError::Decode(format!("getAgent: expected tuple, got {:?}", other))),
        }
    }

    async fn get_score(&self, id: u64) -> Result<f64, ChainError> {
        let token = self.call_single("getCredScore", Some(id)).await?;
        Ok(u256_to_f64(uint(&token, "getCredScore")?))
    }

    async fn get_weight(&self, id: u64) -> Result<f64, ChainError> {
        let token = self.call_single("points", Some(id)).await?;
        Ok(u256_to_f64(uint(&token, "points")?))
    }

    async fn get_owner(&self, id: u64) -> Result<String, ChainError> {
        match self.call_single("ownerOf", Some(id)).await? {
            Token::Address(owner) => Ok(to_checksum(&owner, None)),
            other => Err(ChainError::Decode(format!("ownerOf: expected address, got {:?}", other))),
        }
    }

    async fn get_total_count(&self) -> Result<u64, ChainError> {
        let token = self.call_single("totalAgents", None).await?;
        u256_to_u64(uint(&token, "totalAgents")?, "totalAgents")
    }
}
